//! Engine tunables.

use std::collections::HashSet;
use std::time::Duration;

use crate::matcher::MatchOptions;
use crate::text::normalise;

/// All tunables of the engine. [`EngineConfig::default`] reproduces
/// production behaviour; tests pin the values.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Matching cascade options (window width, shortlist, threshold).
    pub match_options: MatchOptions,
    /// How many leading hypotheses get the fast and heavy paths.
    pub heavy_hypotheses: usize,
    /// Per-hypothesis budget of the heavy path.
    pub heavy_budget: Duration,
    /// Budget of a pending-buffer drain or inline fallback match.
    pub pending_budget: Duration,
    /// Capacity of the pending-match buffer.
    pub pending_capacity: usize,
    /// Default weight of ASR confidence in the combined rank.
    pub asr_weight: f64,
    /// Quiet period after the last mutation before a full binary rebuild.
    pub rebuild_debounce: Duration,
    /// Normalised system phrases stripped before matching.
    pub filter_phrases: HashSet<String>,
    /// Audit log size ceiling; an oversized log is truncated on open.
    pub audit_ceiling_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let filter_phrases = ["stop", "stoppen", "stop luisteren", "oke", "ja", "nee", "start"]
            .iter()
            .map(|p| normalise(p))
            .collect();
        Self {
            match_options: MatchOptions::default(),
            heavy_hypotheses: 3,
            heavy_budget: Duration::from_millis(300),
            pending_budget: Duration::from_millis(250),
            pending_capacity: 16,
            asr_weight: 0.4,
            rebuild_debounce: Duration::from_secs(1),
            filter_phrases,
            audit_ceiling_bytes: 5 * 1024 * 1024,
        }
    }
}
