//! Runtime matching types: per-call context and the closed result union.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Display data for one species, as the host knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesInfo {
    pub canonical: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tilename: Option<String>,
}

/// Read-only context for a single match call.
///
/// All sets are snapshots taken by the host; concurrent reads are safe.
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    /// Species currently shown as count tiles.
    pub tiles_species_ids: HashSet<String>,
    /// Species allowed at the current site.
    pub site_allowed_ids: HashSet<String>,
    /// Species recently counted (usage-store window).
    pub recent_ids: HashSet<String>,
    /// Display names by species id.
    pub species_by_id: HashMap<String, SpeciesInfo>,
}

impl MatchContext {
    pub fn display_name(&self, species_id: &str) -> Option<&str> {
        self.species_by_id
            .get(species_id)
            .map(|info| info.canonical.as_str())
    }
}

/// One scored species candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub species_id: String,
    pub display_name: String,
    /// Match confidence in `[0, 1]`.
    pub score: f64,
    pub is_in_tiles: bool,
    /// Which rule produced this candidate (`exact_canonical_tiles`,
    /// `fuzzy_site`, ...).
    pub source: String,
}

/// A matched species with its spoken count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesCount {
    pub candidate: Candidate,
    pub amount: u32,
    pub source: String,
}

/// Outcome of matching one utterance. Closed union; every consumer handles
/// all five shapes exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchResult {
    /// Single confident hit on a species already on a tile.
    AutoAccept {
        candidate: Candidate,
        hypothesis: String,
        source: String,
        amount: u32,
    },
    /// Single confident hit on a species not yet on a tile; the host shows
    /// an add-tile popup.
    AutoAcceptAddPopup {
        candidate: Candidate,
        hypothesis: String,
        source: String,
        amount: u32,
    },
    /// Several plausible species; the host lets the user pick.
    SuggestionList {
        candidates: Vec<Candidate>,
        hypothesis: String,
        source: String,
    },
    /// One utterance named several species, each with a count.
    MultiMatch {
        matches: Vec<SpeciesCount>,
        hypothesis: String,
        source: String,
    },
    NoMatch { hypothesis: String, source: String },
}

impl MatchResult {
    pub fn no_match(hypothesis: impl Into<String>, source: impl Into<String>) -> Self {
        Self::NoMatch {
            hypothesis: hypothesis.into(),
            source: source.into(),
        }
    }

    /// The pipeline/rule tag of this result.
    pub fn source(&self) -> &str {
        match self {
            Self::AutoAccept { source, .. }
            | Self::AutoAcceptAddPopup { source, .. }
            | Self::SuggestionList { source, .. }
            | Self::MultiMatch { source, .. }
            | Self::NoMatch { source, .. } => source,
        }
    }

    /// Stable lowercase tag for audit rows.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AutoAccept { .. } => "auto_accept",
            Self::AutoAcceptAddPopup { .. } => "auto_accept_add_popup",
            Self::SuggestionList { .. } => "suggestion_list",
            Self::MultiMatch { .. } => "multi_match",
            Self::NoMatch { .. } => "no_match",
        }
    }

    /// Best matcher score carried by this result, `0.0` for a miss.
    pub fn best_score(&self) -> f64 {
        match self {
            Self::AutoAccept { candidate, .. } | Self::AutoAcceptAddPopup { candidate, .. } => {
                candidate.score
            }
            Self::SuggestionList { candidates, .. } => candidates
                .iter()
                .map(|c| c.score)
                .fold(0.0, f64::max),
            Self::MultiMatch { matches, .. } => matches
                .iter()
                .map(|m| m.candidate.score)
                .fold(0.0, f64::max),
            Self::NoMatch { .. } => 0.0,
        }
    }
}
