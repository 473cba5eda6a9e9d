//! Session-windowed species popularity, used as the matcher's recency prior.
//!
//! Every use adds a unit boost to a score that decays with a seven-day
//! half-life. Only species used within the last ten counting sessions are
//! retained; everything older is pruned on the next mutation.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retained session window.
const MAX_SESSIONS: usize = 10;

/// Hard cap on readout sizes, regardless of the caller's limit.
const MAX_READOUT: usize = 75;

/// Score half-life in days.
const HALF_LIFE_DAYS: f64 = 7.0;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Applies exponential decay to a score over `delta_ms` of elapsed time.
pub fn decayed(score: f64, delta_ms: i64) -> f64 {
    if delta_ms <= 0 {
        return score;
    }
    let days = delta_ms as f64 / MS_PER_DAY;
    score * (-(std::f64::consts::LN_2 / HALF_LIFE_DAYS) * days).exp()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub score: f64,
    pub last_used_ms: i64,
    pub last_session_id: u64,
}

/// Serialisable usage state: the retained session ids and per-species
/// entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageScoreState {
    pub current_session: u64,
    pub sessions: VecDeque<u64>,
    pub entries: HashMap<String, UsageEntry>,
}

impl UsageScoreState {
    /// Opens a session and prunes species not used in any retained session.
    pub fn start_session(&mut self, session_id: u64) {
        self.current_session = session_id;
        if self.sessions.back() != Some(&session_id) {
            self.sessions.push_back(session_id);
        }
        while self.sessions.len() > MAX_SESSIONS {
            self.sessions.pop_front();
        }
        let retained: Vec<u64> = self.sessions.iter().copied().collect();
        self.entries
            .retain(|_, entry| retained.contains(&entry.last_session_id));
    }

    /// Decays the existing score, adds a unit boost and pins the entry to
    /// the current session.
    pub fn record_use_at(&mut self, species_id: &str, now_ms: i64) {
        let session = self.current_session;
        let entry = self
            .entries
            .entry(species_id.to_owned())
            .or_insert(UsageEntry {
                score: 0.0,
                last_used_ms: now_ms,
                last_session_id: session,
            });
        entry.score = decayed(entry.score, now_ms - entry.last_used_ms) + 1.0;
        entry.last_used_ms = now_ms;
        entry.last_session_id = session;
    }

    /// Species ranked by decayed score (descending), species id ascending on
    /// ties. Capped at 75 entries.
    pub fn top_species_at(&self, limit: usize, now_ms: i64) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), decayed(entry.score, now_ms - entry.last_used_ms)))
            .collect();
        ranked.sort_by(|(ida, sa), (idb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ida.cmp(idb))
        });
        ranked.truncate(limit.min(MAX_READOUT));
        ranked
    }

    /// Species by most recent use, newest first. Capped at 75 entries.
    pub fn recents(&self, limit: usize) -> Vec<String> {
        let mut ranked: Vec<(&String, i64)> = self
            .entries
            .iter()
            .map(|(id, entry)| (id, entry.last_used_ms))
            .collect();
        ranked.sort_by(|(ida, ta), (idb, tb)| tb.cmp(ta).then_with(|| ida.cmp(idb)));
        ranked
            .into_iter()
            .take(limit.min(MAX_READOUT))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Thread-safe holder with best-effort persistence to the process-private
/// area. Persistence failures never fail the caller.
pub struct UsageScoreStore {
    state: Mutex<UsageScoreState>,
    path: Option<PathBuf>,
}

impl UsageScoreStore {
    /// Loads prior state from `path` when present.
    pub fn new(path: Option<PathBuf>) -> Self {
        let state = path
            .as_ref()
            .and_then(|p| fs::read(p).ok())
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        Self {
            state: Mutex::new(state),
            path,
        }
    }

    pub fn start_session(&self, session_id: u64) {
        let mut state = self.state.lock();
        state.start_session(session_id);
        self.save(&state);
    }

    pub fn record_use(&self, species_id: &str) {
        self.record_use_at(species_id, now_ms());
    }

    pub fn record_use_at(&self, species_id: &str, now_ms: i64) {
        let mut state = self.state.lock();
        state.record_use_at(species_id, now_ms);
        self.save(&state);
    }

    pub fn top_species(&self, limit: usize) -> Vec<(String, f64)> {
        self.state.lock().top_species_at(limit, now_ms())
    }

    pub fn recents(&self, limit: usize) -> Vec<String> {
        self.state.lock().recents(limit)
    }

    fn save(&self, state: &UsageScoreState) {
        let Some(path) = &self.path else {
            return;
        };
        match serde_json::to_vec_pretty(state) {
            Ok(bytes) => {
                if let Err(e) = fs::write(path, bytes) {
                    warn!(path = %path.display(), error = %e, "usage state not persisted");
                }
            }
            Err(e) => warn!(error = %e, "usage state not serialisable"),
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
