//! N-best hypothesis fusion.
//!
//! The orchestrator turns an ordered ASR hypothesis list into one
//! [`MatchResult`]:
//!
//! 1. filter-phrase hypotheses are dropped;
//! 2. a fast exact-lookup pass over the leading hypotheses short-circuits
//!    the common case without any fuzzy work;
//! 3. the full matcher runs per hypothesis under a hard budget, ranking
//!    outcomes by `asr_weight * asr_conf + (1 - asr_weight) * match_score`;
//! 4. hypotheses that blow the budget move to the bounded pending buffer
//!    and are resolved out of band via the registered listener;
//! 5. trailing hypotheses only get the exact lookup.
//!
//! Sessions are monotonic; starting a new one cancels in-flight work and
//! prevents any result of the previous session from reaching the listener.

mod pending;

pub use pending::PendingListener;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::audit::{AuditLog, AuditRecord};
use crate::config::EngineConfig;
use crate::index::{AliasStore, IndexSnapshot};
use crate::matcher::{match_bounded, CancelFlag, MatchBudget};
use crate::numbers;
use crate::text::{normalise, tokenise};
use crate::types::{species_id_cmp, Candidate, MatchContext, MatchResult};

use pending::{PendingJob, PendingWorker};

/// Fast-path and tail-sweep exact hits report this fixed confidence.
const QUICK_EXACT_SCORE: f64 = 0.9;

struct PopupHit {
    combined: f64,
    candidate: Candidate,
    result: MatchResult,
}

pub struct Orchestrator {
    store: Arc<AliasStore>,
    config: Arc<EngineConfig>,
    audit: Arc<AuditLog>,
    session: Arc<AtomicU64>,
    cancel: Mutex<CancelFlag>,
    pending: PendingWorker,
}

impl Orchestrator {
    pub fn new(store: Arc<AliasStore>, config: Arc<EngineConfig>, audit: Arc<AuditLog>) -> Self {
        let session = Arc::new(AtomicU64::new(1));
        let pending = PendingWorker::new(
            store.clone(),
            config.match_options.clone(),
            config.pending_budget,
            config.pending_capacity,
            session.clone(),
        );
        Self {
            store,
            config,
            audit,
            session,
            cancel: Mutex::new(CancelFlag::new()),
            pending,
        }
    }

    /// Opens a new listening session, cancelling in-flight work of the
    /// previous one. Returns the new session id.
    pub fn start_session(&self) -> u64 {
        let id = self.session.fetch_add(1, Ordering::AcqRel) + 1;
        let mut cancel = self.cancel.lock();
        cancel.cancel();
        *cancel = CancelFlag::new();
        debug!(session = id, "session started");
        id
    }

    pub fn session_id(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    /// Cancels the current parse; no partial result escapes.
    pub fn stop_listening(&self) {
        self.cancel.lock().cancel();
    }

    pub fn set_pending_result_listener(&self, listener: PendingListener) {
        self.pending.set_listener(listener);
    }

    pub fn shutdown(&self) {
        self.pending.shutdown();
    }

    /// Fuses an ordered hypothesis list into one result. See module docs.
    pub fn parse_hypotheses(
        &self,
        hypotheses: &[(String, f64)],
        context: &MatchContext,
        partials: bool,
        asr_weight: f64,
    ) -> MatchResult {
        let session = self.session_id();
        let cancel = self.cancel.lock().clone();
        let raw = hypotheses
            .first()
            .map(|(text, _)| text.clone())
            .unwrap_or_default();

        let filtered: Vec<(String, f64)> = hypotheses
            .iter()
            .filter(|(text, _)| {
                let norm = normalise(text);
                !norm.is_empty() && !self.config.filter_phrases.contains(&norm)
            })
            .cloned()
            .collect();
        if filtered.is_empty() {
            return self.finish(&raw, session, hypotheses, MatchResult::no_match(&raw, "none"));
        }

        let snapshot = self.store.snapshot();
        let lead = self.config.heavy_hypotheses;

        // Fast path: plain exact lookup, no fuzzy work.
        for (text, _) in filtered.iter().take(lead) {
            if let Some(result) = quick_exact(&snapshot, text, context) {
                return self.finish(&raw, session, hypotheses, result);
            }
        }
        if partials {
            // More hypotheses are coming; heavy work waits for the final
            // list.
            return self.finish(&raw, session, hypotheses, MatchResult::no_match(&raw, "none"));
        }

        // Heavy path under a per-hypothesis budget.
        let mut popups: Vec<PopupHit> = Vec::new();
        let mut queued = false;
        let mut buffer_full_timeout = false;
        for (text, confidence) in filtered.iter().take(lead) {
            let budget = MatchBudget {
                deadline: Some(Instant::now() + self.config.heavy_budget),
                cancel: Some(cancel.clone()),
            };
            match match_bounded(&snapshot, text, context, &self.config.match_options, &budget) {
                Some(result) => {
                    if let Some(result) = self.absorb_heavy_result(
                        result,
                        *confidence,
                        asr_weight,
                        &mut popups,
                    ) {
                        return self.finish(&raw, session, hypotheses, result);
                    }
                }
                None if cancel.is_cancelled() => {
                    return self.finish(
                        &raw,
                        session,
                        hypotheses,
                        MatchResult::no_match(&raw, "cancelled"),
                    );
                }
                None => {
                    let job = PendingJob {
                        session_id: session,
                        hypothesis: text.clone(),
                        context: context.clone(),
                    };
                    if self.pending.try_enqueue(job) {
                        queued = true;
                        continue;
                    }
                    // Buffer saturated: one inline fallback attempt.
                    let budget = MatchBudget {
                        deadline: Some(Instant::now() + self.config.pending_budget),
                        cancel: Some(cancel.clone()),
                    };
                    match match_bounded(
                        &snapshot,
                        text,
                        context,
                        &self.config.match_options,
                        &budget,
                    ) {
                        Some(result) => {
                            if let Some(result) = self.absorb_heavy_result(
                                result,
                                *confidence,
                                asr_weight,
                                &mut popups,
                            ) {
                                return self.finish(&raw, session, hypotheses, result);
                            }
                        }
                        None => buffer_full_timeout = true,
                    }
                }
            }
        }

        // Tail sweep: exact lookup only for hypotheses beyond the leaders.
        for (text, _) in filtered.iter().skip(lead) {
            if let Some(result) = quick_exact(&snapshot, text, context) {
                return self.finish(&raw, session, hypotheses, result);
            }
        }

        let result = self.assemble_tail(&raw, popups, queued, buffer_full_timeout);
        self.finish(&raw, session, hypotheses, result)
    }

    /// Folds one heavy-path result into the running state. Returns
    /// `Some(result)` when it short-circuits the whole parse.
    fn absorb_heavy_result(
        &self,
        result: MatchResult,
        confidence: f64,
        asr_weight: f64,
        popups: &mut Vec<PopupHit>,
    ) -> Option<MatchResult> {
        match &result {
            MatchResult::AutoAccept { .. } | MatchResult::MultiMatch { .. } => Some(result),
            MatchResult::AutoAcceptAddPopup { candidate, .. } => {
                let combined =
                    asr_weight * confidence + (1.0 - asr_weight) * candidate.score;
                popups.push(PopupHit {
                    combined,
                    candidate: candidate.clone(),
                    result,
                });
                None
            }
            MatchResult::SuggestionList { .. } | MatchResult::NoMatch { .. } => None,
        }
    }

    fn assemble_tail(
        &self,
        raw: &str,
        mut popups: Vec<PopupHit>,
        queued: bool,
        buffer_full_timeout: bool,
    ) -> MatchResult {
        popups.sort_by(|a, b| {
            b.combined
                .partial_cmp(&a.combined)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| species_id_cmp(&a.candidate.species_id, &b.candidate.species_id))
        });

        let mut distinct: Vec<&str> = popups
            .iter()
            .map(|p| p.candidate.species_id.as_str())
            .collect();
        distinct.sort_unstable();
        distinct.dedup();

        match distinct.len() {
            0 => {
                if buffer_full_timeout {
                    MatchResult::no_match(raw, "buffer-full")
                } else if queued {
                    MatchResult::no_match(raw, "queued")
                } else {
                    MatchResult::no_match(raw, "none")
                }
            }
            1 => popups.into_iter().next().expect("one popup").result,
            _ => {
                let mut seen = std::collections::HashSet::new();
                let candidates: Vec<Candidate> = popups
                    .into_iter()
                    .filter(|p| seen.insert(p.candidate.species_id.clone()))
                    .map(|p| p.candidate)
                    .collect();
                MatchResult::SuggestionList {
                    candidates,
                    hypothesis: raw.to_owned(),
                    source: "suggestion".to_owned(),
                }
            }
        }
    }

    fn finish(
        &self,
        raw: &str,
        session: u64,
        hypotheses: &[(String, f64)],
        result: MatchResult,
    ) -> MatchResult {
        self.audit
            .record(&AuditRecord::of(raw, Some(session), hypotheses, &result));
        result
    }
}

/// Whole-hypothesis exact lookup. Returns `None` on a miss, on a
/// number-word utterance, or when every hit is a number-like alias.
fn quick_exact(
    snapshot: &IndexSnapshot,
    text: &str,
    context: &MatchContext,
) -> Option<MatchResult> {
    let norm = normalise(text);
    if norm.is_empty() {
        return None;
    }
    let tokens = tokenise(&norm);
    if tokens.iter().all(|t| numbers::is_number_word(t)) {
        return None;
    }

    let mut records: Vec<_> = snapshot
        .find_exact(&norm)
        .into_iter()
        .filter(|r| !numbers::is_number_candidate(r))
        .collect();
    if records.is_empty() {
        return None;
    }
    records.sort_by(|a, b| species_id_cmp(&a.species_id, &b.species_id));
    let record = records
        .iter()
        .find(|r| context.tiles_species_ids.contains(&r.species_id))
        .or_else(|| {
            records
                .iter()
                .find(|r| context.site_allowed_ids.contains(&r.species_id))
        })
        .unwrap_or(&records[0]);

    let is_in_tiles = context.tiles_species_ids.contains(&record.species_id);
    let is_canonical = normalise(&record.canonical) == norm;
    let rule = match (is_canonical, is_in_tiles) {
        (true, true) => "exact_canonical_tiles",
        (true, false) => "exact_canonical_site",
        (false, true) => "exact_alias_tiles",
        (false, false) => "exact_alias_site",
    };

    let candidate = Candidate {
        species_id: record.species_id.clone(),
        display_name: context
            .display_name(&record.species_id)
            .unwrap_or(&record.canonical)
            .to_owned(),
        score: QUICK_EXACT_SCORE,
        is_in_tiles,
        source: rule.to_owned(),
    };
    Some(if is_in_tiles {
        MatchResult::AutoAccept {
            candidate,
            hypothesis: text.to_owned(),
            source: "quick_exact".to_owned(),
            amount: 1,
        }
    } else {
        MatchResult::AutoAcceptAddPopup {
            candidate,
            hypothesis: text.to_owned(),
            source: "quick_exact".to_owned(),
            amount: 1,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::StorageLayout;
    use crate::test_utils::{context_of, master_of, species};
    use crate::types::AliasMaster;
    use std::time::Duration;

    fn harness(config: EngineConfig) -> (Orchestrator, AliasMaster, tempfile::TempDir) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = StorageLayout::new(tmp.path().join("shared"), tmp.path().join("priv"));
        let master = master_of(vec![
            species("20", "Aalscholver", None, &[]),
            species("30", "Boerenzwaluw", None, &["boertje"]),
            species("1001", "Koolmees", None, &[]),
            species("2001", "Buizerd", None, &["bui"]),
        ]);
        let store = Arc::new(AliasStore::new(layout.clone()));
        store.install(master.to_index());
        let audit = Arc::new(AuditLog::open(layout.audit_log_path(), 1024 * 1024));
        let orchestrator = Orchestrator::new(store, Arc::new(config), audit);
        (orchestrator, master, tmp)
    }

    fn hyp(items: &[(&str, f64)]) -> Vec<(String, f64)> {
        items.iter().map(|(t, c)| ((*t).to_owned(), *c)).collect()
    }

    #[test]
    fn fast_path_hits_exact_species() {
        let (orchestrator, master, _tmp) = harness(EngineConfig::default());
        let ctx = context_of(&master, &["2001"], &["2001"], &[]);

        let result =
            orchestrator.parse_hypotheses(&hyp(&[("buizerd", 0.9)]), &ctx, false, 0.4);
        match result {
            MatchResult::AutoAccept {
                candidate, source, amount, ..
            } => {
                assert_eq!(source, "quick_exact");
                assert_eq!(candidate.source, "exact_canonical_tiles");
                assert_eq!(candidate.score, 0.9);
                assert_eq!(amount, 1);
            }
            other => panic!("expected AutoAccept, got {other:?}"),
        }
    }

    #[test]
    fn counts_require_the_heavy_path() {
        let (orchestrator, master, _tmp) = harness(EngineConfig::default());
        let ctx = context_of(&master, &["1001"], &["1001", "2001"], &[]);

        let result =
            orchestrator.parse_hypotheses(&hyp(&[("koolmees vijf", 0.95)]), &ctx, false, 0.4);
        match result {
            MatchResult::AutoAccept {
                candidate, amount, source, ..
            } => {
                assert_eq!(candidate.species_id, "1001");
                assert_eq!(amount, 5);
                assert_eq!(source, "exact_canonical_tiles");
            }
            other => panic!("expected AutoAccept, got {other:?}"),
        }
    }

    #[test]
    fn filter_phrases_are_dropped() {
        let (orchestrator, master, _tmp) = harness(EngineConfig::default());
        let ctx = context_of(&master, &["20"], &["20"], &[]);

        let result =
            orchestrator.parse_hypotheses(&hyp(&[("stop luisteren", 0.99)]), &ctx, false, 0.4);
        assert!(
            matches!(&result, MatchResult::NoMatch { source, .. } if source == "none"),
            "{result:?}"
        );
    }

    #[test]
    fn partial_lists_only_run_the_fast_path() {
        let (orchestrator, master, _tmp) = harness(EngineConfig::default());
        let ctx = context_of(&master, &["20"], &["20"], &[]);

        // Fuzzy-only input: a partial parse must not do heavy work.
        let result =
            orchestrator.parse_hypotheses(&hyp(&[("alsgolver", 0.8)]), &ctx, true, 0.4);
        assert!(matches!(result, MatchResult::NoMatch { .. }), "{result:?}");

        // The same input on the final list resolves fuzzily.
        let result =
            orchestrator.parse_hypotheses(&hyp(&[("alsgolver", 0.8)]), &ctx, false, 0.4);
        assert!(matches!(result, MatchResult::AutoAccept { .. }), "{result:?}");
    }

    #[test]
    fn fuzzy_hit_with_count_short_circuits() {
        let (orchestrator, master, _tmp) = harness(EngineConfig::default());
        let ctx = context_of(&master, &["30"], &["30"], &[]);

        let result = orchestrator.parse_hypotheses(
            &hyp(&[("boertie vier", 0.8), ("boertje vier", 0.7)]),
            &ctx,
            false,
            0.4,
        );
        match result {
            MatchResult::AutoAccept {
                candidate, amount, ..
            } => {
                assert_eq!(candidate.species_id, "30");
                assert_eq!(amount, 4);
            }
            other => panic!("expected AutoAccept, got {other:?}"),
        }
    }

    #[test]
    fn distinct_popup_species_become_suggestions() {
        let (orchestrator, master, _tmp) = harness(EngineConfig::default());
        // Neither species on a tile, both allowed on site.
        let ctx = context_of(&master, &[], &["20", "30"], &[]);

        let result = orchestrator.parse_hypotheses(
            &hyp(&[("alsgolver", 0.8), ("boertie", 0.7)]),
            &ctx,
            false,
            0.4,
        );
        match result {
            MatchResult::SuggestionList {
                candidates, source, ..
            } => {
                assert_eq!(source, "suggestion");
                let mut ids: Vec<&str> =
                    candidates.iter().map(|c| c.species_id.as_str()).collect();
                ids.sort_unstable();
                assert_eq!(ids, vec!["20", "30"]);
            }
            other => panic!("expected SuggestionList, got {other:?}"),
        }
    }

    #[test]
    fn tail_hypotheses_get_exact_lookup_only() {
        let (orchestrator, master, _tmp) = harness(EngineConfig::default());
        let ctx = context_of(&master, &["2001"], &["2001"], &[]);

        let result = orchestrator.parse_hypotheses(
            &hyp(&[
                ("qqq", 0.9),
                ("www", 0.8),
                ("eee", 0.7),
                ("bui", 0.6),
            ]),
            &ctx,
            false,
            0.4,
        );
        match result {
            MatchResult::AutoAccept {
                candidate, source, ..
            } => {
                assert_eq!(source, "quick_exact");
                assert_eq!(candidate.species_id, "2001");
                assert_eq!(candidate.source, "exact_alias_tiles");
            }
            other => panic!("expected AutoAccept, got {other:?}"),
        }
    }

    #[test]
    fn exhausted_budget_queues_to_the_pending_buffer() {
        let config = EngineConfig {
            heavy_budget: Duration::ZERO,
            ..EngineConfig::default()
        };
        let (orchestrator, master, _tmp) = harness(config);
        let ctx = context_of(&master, &["20"], &["20"], &[]);

        let (tx, rx) = crossbeam_channel::unbounded();
        orchestrator.set_pending_result_listener(Box::new(move |id, result| {
            let _ = tx.send((id, result));
        }));

        let result =
            orchestrator.parse_hypotheses(&hyp(&[("alsgolver", 0.8)]), &ctx, false, 0.4);
        assert!(
            matches!(&result, MatchResult::NoMatch { source, .. } if source == "queued"),
            "{result:?}"
        );

        let (id, delivered) = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("pending result delivered");
        assert_eq!(id, orchestrator.session_id());
        assert!(
            matches!(delivered, MatchResult::AutoAccept { .. }),
            "{delivered:?}"
        );
    }

    #[test]
    fn unusable_buffer_with_failing_fallback_reports_buffer_full() {
        let config = EngineConfig {
            heavy_budget: Duration::ZERO,
            pending_budget: Duration::ZERO,
            pending_capacity: 1,
            ..EngineConfig::default()
        };
        let (orchestrator, master, _tmp) = harness(config);
        let ctx = context_of(&master, &["20"], &["20"], &[]);

        // With the drain worker gone the buffer cannot accept work, which is
        // the deterministic face of saturation: enqueue fails, the inline
        // fallback runs out of budget, the caller learns "buffer-full".
        orchestrator.shutdown();
        let result =
            orchestrator.parse_hypotheses(&hyp(&[("alsgolver", 0.8)]), &ctx, false, 0.4);
        assert!(
            matches!(&result, MatchResult::NoMatch { source, .. } if source == "buffer-full"),
            "{result:?}"
        );
    }

    #[test]
    fn stop_listening_cancels_the_parse() {
        let (orchestrator, master, _tmp) = harness(EngineConfig::default());
        let ctx = context_of(&master, &["20"], &["20"], &[]);

        orchestrator.stop_listening();
        let result =
            orchestrator.parse_hypotheses(&hyp(&[("alsgolver", 0.8)]), &ctx, false, 0.4);
        assert!(
            matches!(&result, MatchResult::NoMatch { source, .. } if source == "cancelled"),
            "{result:?}"
        );

        // A new session clears the cancellation.
        orchestrator.start_session();
        let result =
            orchestrator.parse_hypotheses(&hyp(&[("alsgolver", 0.8)]), &ctx, false, 0.4);
        assert!(matches!(result, MatchResult::AutoAccept { .. }), "{result:?}");
    }

    #[test]
    fn sessions_are_monotonic() {
        let (orchestrator, _master, _tmp) = harness(EngineConfig::default());
        let first = orchestrator.start_session();
        let second = orchestrator.start_session();
        assert!(second > first);
    }
}
