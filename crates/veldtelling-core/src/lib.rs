//! Dutch speech-to-species alias matching engine.
//!
//! Given an N-best list of ASR hypotheses, the engine returns the most
//! likely bird species together with the spoken count, using a hybrid
//! phonetic scoring cascade (text edit distance, Cologne code, IPA
//! phonemes) over a persistent alias index with contextual priors.

pub mod audit;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod matcher;
pub mod numbers;
pub mod orchestrator;
pub mod phonetics;
pub mod text;
pub mod types;
pub mod usage;

// Re-export main types and functions
pub use config::EngineConfig;
pub use engine::{SeedData, TallyEngine};
pub use error::PersistError;
pub use index::{AliasStore, IndexSnapshot, PersistencePipeline, StorageLayout};
pub use matcher::{match_hypothesis, CancelFlag, MatchOptions};
pub use orchestrator::{Orchestrator, PendingListener};
pub use text::{normalise, tokenise};

// Re-export types explicitly
pub use types::{
    species_id_cmp,
    AliasData,
    AliasIndex,
    AliasMaster,
    AliasRecord,
    AliasSource,
    Candidate,
    MatchContext,
    MatchResult,
    SpeciesCount,
    SpeciesEntry,
    SpeciesInfo,
    MASTER_VERSION,
};

// Test utilities (must be at end of file)
#[cfg(test)]
pub mod test_utils;
