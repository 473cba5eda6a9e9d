//! In-memory alias index with snapshot semantics.
//!
//! Readers take an `Arc` snapshot and never contend with writers; mutations
//! build a fresh snapshot and swap the handle, so a `match` in flight keeps
//! seeing a consistent index.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::codec;
use crate::error::PersistError;
use crate::index::layout::StorageLayout;
use crate::index::persistence::{decode_cbor_gz, encode_cbor_gz};
use crate::phonetics::cologne;
use crate::text::normalise;
use crate::types::{
    species_id_cmp, AliasIndex, AliasMaster, AliasRecord, AliasSource, SpeciesInfo,
};

/// Immutable view over one generation of the alias index, with the lookup
/// tables the matcher needs.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    index: AliasIndex,
    /// `norm` -> indices into `index.records`.
    by_norm: HashMap<String, Vec<usize>>,
    /// normalised canonical name -> species ids carrying it.
    canonical_species: HashMap<String, Vec<String>>,
    /// species id -> display info, ordered for stable listings.
    species: BTreeMap<String, SpeciesInfo>,
}

impl IndexSnapshot {
    pub fn build(index: AliasIndex) -> Self {
        let mut by_norm: HashMap<String, Vec<usize>> = HashMap::new();
        let mut canonical_species: HashMap<String, Vec<String>> = HashMap::new();
        let mut species = BTreeMap::new();

        for (i, record) in index.records.iter().enumerate() {
            by_norm.entry(record.norm.clone()).or_default().push(i);
            let canonical_norm = normalise(&record.canonical);
            let ids = canonical_species.entry(canonical_norm).or_default();
            if !ids.contains(&record.species_id) {
                ids.push(record.species_id.clone());
            }
            species
                .entry(record.species_id.clone())
                .or_insert_with(|| SpeciesInfo {
                    canonical: record.canonical.clone(),
                    tilename: record.tilename.clone(),
                });
        }
        for ids in canonical_species.values_mut() {
            ids.sort_by(|a, b| species_id_cmp(a, b));
        }

        Self {
            index,
            by_norm,
            canonical_species,
            species,
        }
    }

    pub fn index(&self) -> &AliasIndex {
        &self.index
    }

    pub fn is_empty(&self) -> bool {
        self.index.records.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.index.records.len()
    }

    /// All records whose `norm` equals the query exactly.
    pub fn find_exact(&self, norm: &str) -> Vec<&AliasRecord> {
        self.by_norm
            .get(norm)
            .map(|indices| indices.iter().map(|&i| &self.index.records[i]).collect())
            .unwrap_or_default()
    }

    /// Species whose canonical display name normalises to the query,
    /// ordered by species id.
    pub fn species_with_canonical(&self, norm: &str) -> &[String] {
        self.canonical_species
            .get(norm)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Up to `top_n` records ranked by Cologne similarity to the query.
    /// The matcher rescales with text and phoneme signals afterwards.
    pub fn find_fuzzy_candidates(
        &self,
        norm: &str,
        top_n: usize,
        threshold: f64,
    ) -> Vec<(&AliasRecord, f64)> {
        let query_code = cologne::encode(norm);
        let mut scored: Vec<(&AliasRecord, f64)> = self
            .index
            .records
            .iter()
            .filter_map(|record| {
                let sim = match record.cologne.as_deref() {
                    Some(code) => cologne::similarity_of_codes(&query_code, code),
                    None => cologne::similarity_of_codes(&query_code, &cologne::encode(&record.norm)),
                };
                (sim >= threshold).then_some((record, sim))
            })
            .collect();
        scored.sort_by(|(ra, sa), (rb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| species_id_cmp(&ra.species_id, &rb.species_id))
                .then_with(|| ra.alias_id.cmp(&rb.alias_id))
        });
        scored.truncate(top_n);
        scored
    }

    pub fn all_species(&self) -> &BTreeMap<String, SpeciesInfo> {
        &self.species
    }
}

/// Outcome of an in-memory alias hot-patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotpatchOutcome {
    Added,
    /// Same `norm` already mapped to the same species.
    Duplicate,
    /// Same `norm` already mapped to a different species; first mapping wins
    /// until a rebuild reconciles.
    Conflict,
    /// Blank alias text.
    InvalidInput,
}

/// Thread-safe holder of the current [`IndexSnapshot`].
pub struct AliasStore {
    layout: StorageLayout,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    load_lock: Mutex<()>,
    loaded: AtomicBool,
}

impl AliasStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self {
            layout,
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
            load_lock: Mutex::new(()),
            loaded: AtomicBool::new(false),
        }
    }

    /// The current snapshot; cheap, never blocks on I/O.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.read().clone()
    }

    /// Installs a freshly built index as the current snapshot.
    pub fn install(&self, index: AliasIndex) {
        let snapshot = Arc::new(IndexSnapshot::build(index));
        *self.snapshot.write() = snapshot;
        self.loaded.store(true, Ordering::Release);
    }

    /// Loads the index once, trying each persisted source in priority order:
    /// process-private cache, VT5BIN10 container, shared CBOR artefact,
    /// master JSON. Idempotent; at most one loader runs at a time.
    pub fn ensure_loaded(&self) -> Result<(), PersistError> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.load_lock.lock();
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        self.load_from_sources()
    }

    /// Drops the current snapshot and re-reads the priority chain.
    pub fn reload_index(&self) -> Result<(), PersistError> {
        let _guard = self.load_lock.lock();
        self.loaded.store(false, Ordering::Release);
        self.load_from_sources()
    }

    fn load_from_sources(&self) -> Result<(), PersistError> {
        let cache_path = self.layout.private_cache_path();
        if let Some(index) = read_cbor_gz_index(&cache_path) {
            debug!(path = %cache_path.display(), records = index.records.len(), "alias index loaded from private cache");
            self.install(index);
            return Ok(());
        }

        let container_path = self.layout.container_path();
        if container_path.is_file() {
            match fs::read(&container_path)
                .map_err(PersistError::from)
                .and_then(|bytes| {
                    codec::decode::<AliasIndex>(&bytes, codec::DATASET_ALIAS_INDEX)
                        .map_err(PersistError::from)
                }) {
                Ok(index) => {
                    debug!(path = %container_path.display(), records = index.records.len(), "alias index loaded from container");
                    self.install(index);
                    return Ok(());
                }
                Err(e) => warn!(path = %container_path.display(), error = %e, "skipping unreadable container"),
            }
        }

        if let Some(index) = read_cbor_gz_index(&self.layout.binary_cbor_path()) {
            debug!(records = index.records.len(), "alias index loaded from shared binary");
            self.install(index);
            return Ok(());
        }

        let master_path = self.layout.master_path();
        if master_path.is_file() {
            match fs::read(&master_path)
                .map_err(PersistError::from)
                .and_then(|bytes| serde_json::from_slice::<AliasMaster>(&bytes).map_err(PersistError::from))
            {
                Ok(mut master) => {
                    master.ensure_derived();
                    let index = master.to_index();
                    debug!(records = index.records.len(), "alias index projected from master");
                    // Write the cache back so the next start skips the
                    // master parse. Best effort.
                    match encode_cbor_gz(&index) {
                        Ok(bytes) => {
                            if let Err(e) = fs::write(self.layout.private_cache_path(), bytes) {
                                warn!(error = %e, "failed to refresh private cache");
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to encode private cache"),
                    }
                    self.install(index);
                    return Ok(());
                }
                Err(e) => warn!(path = %master_path.display(), error = %e, "skipping unreadable master"),
            }
        }

        Err(PersistError::IndexUnavailable)
    }

    /// Mutates the in-memory index synchronously. Persistence happens in the
    /// pipeline; this only guarantees the running process sees the alias.
    pub fn add_alias_hotpatch(
        &self,
        species_id: &str,
        alias_raw: &str,
        canonical: &str,
        tilename: Option<&str>,
    ) -> HotpatchOutcome {
        let norm = normalise(alias_raw);
        if norm.is_empty() {
            return HotpatchOutcome::InvalidInput;
        }

        let mut guard = self.snapshot.write();
        if let Some(existing) = guard.find_exact(&norm).first() {
            return if existing.species_id == species_id {
                HotpatchOutcome::Duplicate
            } else {
                HotpatchOutcome::Conflict
            };
        }

        let mut index = guard.index.clone();
        let per_species = index
            .records
            .iter()
            .filter(|r| r.species_id == species_id)
            .count();
        index.records.push(AliasRecord {
            alias_id: format!("{}_{}", species_id, per_species + 1),
            species_id: species_id.to_owned(),
            canonical: canonical.to_owned(),
            tilename: tilename.map(str::to_owned),
            alias: alias_raw.trim().to_lowercase(),
            norm: norm.clone(),
            cologne: Some(cologne::encode(&norm)).filter(|c| !c.is_empty()),
            phonemes: Some(crate::phonetics::ipa::phonemize(&norm)).filter(|p| !p.is_empty()),
            weight: 1.0,
            source: AliasSource::UserFieldTraining,
        });
        index.timestamp = Utc::now();
        *guard = Arc::new(IndexSnapshot::build(index));
        self.loaded.store(true, Ordering::Release);
        HotpatchOutcome::Added
    }
}

fn read_cbor_gz_index(path: &std::path::Path) -> Option<AliasIndex> {
    if !path.is_file() {
        return None;
    }
    match fs::read(path).map_err(PersistError::from).and_then(|bytes| decode_cbor_gz(&bytes)) {
        Ok(index) => Some(index),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping unreadable cbor.gz artefact");
            None
        }
    }
}
