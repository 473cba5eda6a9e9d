//! Data model: persisted alias forms and runtime match results.

mod alias;
mod matching;

pub use alias::{
    species_id_cmp, AliasData, AliasIndex, AliasMaster, AliasRecord, AliasSource, SpeciesEntry,
    MASTER_VERSION,
};
pub use matching::{Candidate, MatchContext, MatchResult, SpeciesCount, SpeciesInfo};
