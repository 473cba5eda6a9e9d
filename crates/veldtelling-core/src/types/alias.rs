//! Persisted alias data model.
//!
//! `AliasMaster` is the durable, human-readable form; `AliasIndex` is the
//! flat projection used at runtime and in the binary artefacts. The
//! projection is pure: identical masters produce identical indexes.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phonetics::{cologne, ipa};
use crate::text::normalise;

/// Schema version of the master document.
pub const MASTER_VERSION: &str = "2.1";

/// Where an alias came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasSource {
    /// The canonical display name, added when seeding.
    SeedCanonical,
    /// The short tile label, added when seeding.
    SeedTilename,
    /// Learned from the user in the field.
    UserFieldTraining,
}

/// One recognisable surface form for a species.
///
/// `norm`, `cologne` and `phonemes` are derived deterministically from
/// `text`; blank derived fields are recomputed on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasData {
    pub text: String,
    #[serde(default)]
    pub norm: String,
    #[serde(default)]
    pub cologne: String,
    #[serde(default)]
    pub phonemes: String,
    pub source: AliasSource,
    /// Present only for user-trained aliases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AliasData {
    /// Builds an alias with all derived fields computed from `text`.
    pub fn derive(text: &str, source: AliasSource, timestamp: Option<DateTime<Utc>>) -> Self {
        let text = text.trim().to_lowercase();
        let norm = normalise(&text);
        let cologne = cologne::encode(&norm);
        let phonemes = ipa::phonemize(&norm);
        Self {
            text,
            norm,
            cologne,
            phonemes,
            source,
            timestamp,
        }
    }

    /// Recomputes any blank derived field. Loading a hand-edited master must
    /// leave every record fully derived.
    pub fn ensure_derived(&mut self) {
        if self.norm.is_empty() {
            self.norm = normalise(&self.text);
        }
        if self.cologne.is_empty() {
            self.cologne = cologne::encode(&self.norm);
        }
        if self.phonemes.is_empty() {
            self.phonemes = ipa::phonemize(&self.norm);
        }
    }
}

/// A species with its ordered alias collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesEntry {
    pub species_id: String,
    pub canonical: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tilename: Option<String>,
    pub aliases: Vec<AliasData>,
}

impl SpeciesEntry {
    /// Whether any alias already normalises to `norm`.
    pub fn has_norm(&self, norm: &str) -> bool {
        self.aliases.iter().any(|a| a.norm == norm)
    }
}

/// The durable, human-editable alias document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasMaster {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub species: Vec<SpeciesEntry>,
}

impl AliasMaster {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            version: MASTER_VERSION.to_owned(),
            timestamp,
            species: Vec::new(),
        }
    }

    /// Recomputes blank derived fields across all species.
    pub fn ensure_derived(&mut self) {
        for species in &mut self.species {
            for alias in &mut species.aliases {
                alias.ensure_derived();
            }
        }
    }

    /// Sorts species by id, numeric-aware.
    pub fn sort_species(&mut self) {
        self.species
            .sort_by(|a, b| species_id_cmp(&a.species_id, &b.species_id));
    }

    /// Projects the master to its flat runtime form. Pure: no I/O, no clock.
    pub fn to_index(&self) -> AliasIndex {
        let mut records = Vec::new();
        for species in &self.species {
            for (i, alias) in species.aliases.iter().enumerate() {
                records.push(AliasRecord {
                    alias_id: format!("{}_{}", species.species_id, i + 1),
                    species_id: species.species_id.clone(),
                    canonical: species.canonical.clone(),
                    tilename: species.tilename.clone(),
                    alias: alias.text.clone(),
                    norm: alias.norm.clone(),
                    cologne: some_if_not_empty(&alias.cologne),
                    phonemes: some_if_not_empty(&alias.phonemes),
                    weight: 1.0,
                    source: alias.source,
                });
            }
        }
        AliasIndex {
            version: self.version.clone(),
            timestamp: self.timestamp,
            records,
        }
    }
}

fn some_if_not_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_owned())
    }
}

/// Flattened runtime row, one per alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub alias_id: String,
    pub species_id: String,
    pub canonical: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tilename: Option<String>,
    pub alias: String,
    pub norm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cologne: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phonemes: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub source: AliasSource,
}

fn default_weight() -> f64 {
    1.0
}

/// The flat binary/in-memory form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AliasIndex {
    #[serde(default)]
    pub version: String,
    #[serde(default = "epoch")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub records: Vec<AliasRecord>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Numeric-aware species-id ordering: ids parsing as integers sort
/// numerically and precede non-numeric ids; the rest sort lexicographically.
pub fn species_id_cmp(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(na), Ok(nb)) => na.cmp(&nb).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
