//! Exact and fuzzy species matching over one utterance.
//!
//! An utterance is walked left to right in token windows (widest first, up
//! to six tokens). Each window first runs the fixed exact cascade —
//! canonical-in-tiles, canonical-in-site, alias-in-tiles, alias-in-site —
//! and only falls back to fuzzy scoring when no exact rule fires. Number
//! words never participate in windows; they are consumed as counts directly
//! after a species match.
//!
//! Fuzzy scoring blends three signals with a contextual prior:
//!
//! ```text
//! base  = 0.45 * text_sim + 0.35 * cologne_sim + 0.20 * phoneme_sim
//! prior = min(0.6, 0.25 * in_recents + 0.25 * in_tiles + 0.15 * in_site)
//! score = 0.8 * base + 0.2 * (prior / 0.6)
//! ```
//!
//! Candidates below the acceptance threshold (0.40) are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::trace;

use crate::index::IndexSnapshot;
use crate::numbers;
use crate::phonetics::{ipa, string_similarity};
use crate::text::tokenise;
use crate::types::{species_id_cmp, Candidate, MatchContext, MatchResult, SpeciesCount};

/// Tunables of the matching cascade. Defaults reproduce production
/// behaviour; tests pin them.
#[derive(Debug, Clone)]
pub struct MatchOptions {
    /// Widest token window tried per position.
    pub max_window: usize,
    /// Shortlist size requested from the index for fuzzy scoring.
    pub shortlist_size: usize,
    /// Minimum Cologne similarity for shortlist membership.
    pub shortlist_threshold: f64,
    /// Final acceptance threshold for fuzzy candidates.
    pub accept_threshold: f64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            max_window: 6,
            shortlist_size: 50,
            shortlist_threshold: 0.2,
            accept_threshold: 0.40,
        }
    }
}

/// Cooperative cancellation flag, checked at window boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Deadline and cancellation for one bounded match attempt.
#[derive(Debug, Clone, Default)]
pub(crate) struct MatchBudget {
    pub deadline: Option<Instant>,
    pub cancel: Option<CancelFlag>,
}

impl MatchBudget {
    fn interrupted(&self) -> bool {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }
}

/// Matches one hypothesis without a budget. Never fails; outcomes are
/// encoded in the result.
pub fn match_hypothesis(
    snapshot: &IndexSnapshot,
    hypothesis: &str,
    context: &MatchContext,
    options: &MatchOptions,
) -> MatchResult {
    match_bounded(snapshot, hypothesis, context, options, &MatchBudget::default())
        .expect("unbudgeted match cannot be interrupted")
}

/// Matches one hypothesis under a budget. Returns `None` when the deadline
/// passed or the flag was cancelled before a result was assembled; no
/// partial result escapes.
pub(crate) fn match_bounded(
    snapshot: &IndexSnapshot,
    hypothesis: &str,
    context: &MatchContext,
    options: &MatchOptions,
    budget: &MatchBudget,
) -> Option<MatchResult> {
    if snapshot.is_empty() {
        return Some(MatchResult::no_match(hypothesis, "index-missing"));
    }
    let tokens = tokenise(hypothesis);
    if tokens.is_empty() {
        return Some(MatchResult::no_match(hypothesis, "none"));
    }

    let mut found: Vec<SpeciesCount> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if budget.interrupted() {
            return None;
        }
        if numbers::is_number_word(&tokens[i]) {
            // A count with no species in front of it carries no information.
            i += 1;
            continue;
        }

        let max_window = options.max_window.min(tokens.len() - i);
        let mut window_hit: Option<(Candidate, usize)> = None;
        for width in (1..=max_window).rev() {
            let window = &tokens[i..i + width];
            if window.iter().any(|t| numbers::is_number_word(t)) {
                continue;
            }
            let window_norm = window.join(" ");
            if let Some(candidate) = exact_cascade(snapshot, &window_norm, context) {
                window_hit = Some((candidate, width));
                break;
            }
            if let Some(candidate) = fuzzy_window(snapshot, &window_norm, context, options) {
                window_hit = Some((candidate, width));
                break;
            }
        }

        match window_hit {
            Some((candidate, width)) => {
                i += width;
                let mut amount = 1;
                if let Some(next) = tokens.get(i) {
                    if let Some(count) = numbers::parse_number_word(next) {
                        amount = count.max(1);
                        i += 1;
                    }
                }
                let source = candidate.source.clone();
                trace!(species = %candidate.species_id, %source, amount, "window matched");
                merge_match(&mut found, candidate, amount, source);
            }
            None => i += 1,
        }
    }

    Some(assemble(found, hypothesis))
}

/// Accumulates a window match; a species heard twice in one utterance sums
/// its counts instead of producing a multi-match with itself.
fn merge_match(found: &mut Vec<SpeciesCount>, candidate: Candidate, amount: u32, source: String) {
    if let Some(existing) = found
        .iter_mut()
        .find(|m| m.candidate.species_id == candidate.species_id)
    {
        existing.amount += amount;
        return;
    }
    found.push(SpeciesCount {
        candidate,
        amount,
        source,
    });
}

fn assemble(found: Vec<SpeciesCount>, hypothesis: &str) -> MatchResult {
    match found.len() {
        0 => MatchResult::no_match(hypothesis, "none"),
        1 => {
            let hit = found.into_iter().next().expect("one element");
            let source = hit.source;
            if hit.candidate.is_in_tiles {
                MatchResult::AutoAccept {
                    candidate: hit.candidate,
                    hypothesis: hypothesis.to_owned(),
                    source,
                    amount: hit.amount,
                }
            } else {
                MatchResult::AutoAcceptAddPopup {
                    candidate: hit.candidate,
                    hypothesis: hypothesis.to_owned(),
                    source,
                    amount: hit.amount,
                }
            }
        }
        _ => MatchResult::MultiMatch {
            matches: found,
            hypothesis: hypothesis.to_owned(),
            source: "multi-species".to_owned(),
        },
    }
}

/// The fixed four-rule exact cascade; first hit wins.
fn exact_cascade(
    snapshot: &IndexSnapshot,
    window_norm: &str,
    context: &MatchContext,
) -> Option<Candidate> {
    let canonical_ids = snapshot.species_with_canonical(window_norm);
    if let Some(id) = canonical_ids
        .iter()
        .find(|id| context.tiles_species_ids.contains(id.as_str()))
    {
        return Some(exact_candidate(snapshot, context, id, true, "exact_canonical_tiles"));
    }
    if let Some(id) = canonical_ids
        .iter()
        .find(|id| context.site_allowed_ids.contains(id.as_str()))
    {
        return Some(exact_candidate(snapshot, context, id, false, "exact_canonical_site"));
    }

    let mut records = snapshot.find_exact(window_norm);
    records.sort_by(|a, b| species_id_cmp(&a.species_id, &b.species_id));
    if let Some(record) = records
        .iter()
        .find(|r| context.tiles_species_ids.contains(&r.species_id))
    {
        return Some(exact_candidate(
            snapshot,
            context,
            &record.species_id,
            true,
            "exact_alias_tiles",
        ));
    }
    if let Some(record) = records
        .iter()
        .find(|r| context.site_allowed_ids.contains(&r.species_id))
    {
        return Some(exact_candidate(
            snapshot,
            context,
            &record.species_id,
            false,
            "exact_alias_site",
        ));
    }
    None
}

fn exact_candidate(
    snapshot: &IndexSnapshot,
    context: &MatchContext,
    species_id: &str,
    is_in_tiles: bool,
    source: &str,
) -> Candidate {
    Candidate {
        species_id: species_id.to_owned(),
        display_name: display_name(snapshot, context, species_id),
        score: 1.0,
        is_in_tiles,
        source: source.to_owned(),
    }
}

fn display_name(snapshot: &IndexSnapshot, context: &MatchContext, species_id: &str) -> String {
    context
        .display_name(species_id)
        .map(str::to_owned)
        .or_else(|| {
            snapshot
                .all_species()
                .get(species_id)
                .map(|info| info.canonical.clone())
        })
        .unwrap_or_else(|| species_id.to_owned())
}

/// Scores the fuzzy shortlist for one window and keeps the single best
/// candidate at or above the acceptance threshold.
fn fuzzy_window(
    snapshot: &IndexSnapshot,
    window_norm: &str,
    context: &MatchContext,
    options: &MatchOptions,
) -> Option<Candidate> {
    let window_phonemes = ipa::phonemize(window_norm);
    let shortlist = snapshot.find_fuzzy_candidates(
        window_norm,
        options.shortlist_size,
        options.shortlist_threshold,
    );

    let mut best: Option<Candidate> = None;
    for (record, cologne_sim) in shortlist {
        if numbers::is_number_candidate(record) {
            continue;
        }

        let text_sim = string_similarity(window_norm, &record.norm);
        let phoneme_sim = match record.phonemes.as_deref() {
            Some(phonemes) if !phonemes.is_empty() => {
                ipa::phoneme_similarity(&window_phonemes, phonemes)
            }
            _ => 0.0,
        };
        let base = 0.45 * text_sim + 0.35 * cologne_sim + 0.20 * phoneme_sim;

        let in_tiles = context.tiles_species_ids.contains(&record.species_id);
        let in_site = context.site_allowed_ids.contains(&record.species_id);
        let in_recents = context.recent_ids.contains(&record.species_id);
        let prior = (0.25 * f64::from(u8::from(in_recents))
            + 0.25 * f64::from(u8::from(in_tiles))
            + 0.15 * f64::from(u8::from(in_site)))
        .min(0.6);
        let score = (0.8 * base + 0.2 * (prior / 0.6)).clamp(0.0, 1.0);

        if score < options.accept_threshold {
            continue;
        }
        let candidate = Candidate {
            species_id: record.species_id.clone(),
            display_name: display_name(snapshot, context, &record.species_id),
            score,
            is_in_tiles: in_tiles,
            source: if in_tiles { "fuzzy_tiles" } else { "fuzzy_site" }.to_owned(),
        };

        let replace = match &best {
            None => true,
            Some(current) => {
                candidate.score > current.score
                    || (candidate.score == current.score
                        && (candidate.is_in_tiles && !current.is_in_tiles
                            || candidate.is_in_tiles == current.is_in_tiles
                                && species_id_cmp(&candidate.species_id, &current.species_id)
                                    == std::cmp::Ordering::Less))
            }
        };
        if replace {
            let done = candidate.score >= 0.9999;
            best = Some(candidate);
            if done {
                break;
            }
        }
    }
    best
}
