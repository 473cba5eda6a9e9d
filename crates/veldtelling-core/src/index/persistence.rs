//! Durability pipeline: master JSON, binary artefacts, private cache.
//!
//! All master mutations run under one single-writer lock. Every artefact is
//! written to a temporary sibling and renamed into place; the process-private
//! cache is written last and is the durable truth for the running process.
//! Full binary rebuilds are debounced on a dedicated worker so a burst of
//! `add_alias` calls coalesces into one rebuild.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{RecvTimeoutError, Sender};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::PersistError;
use crate::index::layout::StorageLayout;
use crate::index::seed::seed_from_species;
use crate::index::store::{AliasStore, HotpatchOutcome};
use crate::text::normalise;
use crate::types::{AliasData, AliasIndex, AliasMaster, AliasSource, SpeciesEntry, SpeciesInfo};

/// Sidecar describing the server files behind the last rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerateMeta {
    pub source_checksum: String,
    pub source_files: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

pub(crate) fn encode_cbor_gz<T: Serialize>(value: &T) -> Result<Vec<u8>, PersistError> {
    let mut raw = Vec::new();
    ciborium::ser::into_writer(value, &mut raw).map_err(|e| PersistError::Cbor(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}

pub(crate) fn decode_cbor_gz<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PersistError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw)?;
    ciborium::de::from_reader(raw.as_slice()).map_err(|e| PersistError::Cbor(e.to_string()))
}

/// Writes to a temporary sibling, then renames into place.
fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

enum RebuildSignal {
    Request,
    Shutdown,
}

struct PipelineShared {
    layout: StorageLayout,
    store: Arc<AliasStore>,
    /// Single-writer discipline over the master document.
    master_lock: Mutex<()>,
}

impl PipelineShared {
    /// Reads the master document, or reconstructs one from the in-memory
    /// snapshot when the file is missing or unreadable.
    fn load_master(&self, now: DateTime<Utc>) -> Result<AliasMaster, PersistError> {
        let path = self.layout.master_path();
        if path.is_file() {
            let bytes = fs::read(&path)?;
            let mut master: AliasMaster = serde_json::from_slice(&bytes)?;
            master.ensure_derived();
            return Ok(master);
        }
        Ok(self.master_from_snapshot(now))
    }

    fn master_from_snapshot(&self, now: DateTime<Utc>) -> AliasMaster {
        let snapshot = self.store.snapshot();
        let mut by_species: BTreeMap<String, SpeciesEntry> = BTreeMap::new();
        for record in &snapshot.index().records {
            let entry = by_species
                .entry(record.species_id.clone())
                .or_insert_with(|| SpeciesEntry {
                    species_id: record.species_id.clone(),
                    canonical: record.canonical.clone(),
                    tilename: record.tilename.clone(),
                    aliases: Vec::new(),
                });
            entry.aliases.push(AliasData {
                text: record.alias.clone(),
                norm: record.norm.clone(),
                cologne: record.cologne.clone().unwrap_or_default(),
                phonemes: record.phonemes.clone().unwrap_or_default(),
                source: record.source,
                timestamp: None,
            });
        }
        let mut master = AliasMaster::new(now);
        master.species = by_species.into_values().collect();
        master.sort_species();
        master
    }

    /// Full rebuild: master -> binary artefacts -> private cache, then swap
    /// the in-memory snapshot.
    fn rebuild(&self, now: DateTime<Utc>) -> Result<(), PersistError> {
        let _guard = self.master_lock.lock();
        let mut master = self.load_master(now)?;
        master.ensure_derived();
        master.sort_species();
        let index = master.to_index();
        log_norm_conflicts(&index);

        let result = self.write_index_artifacts(&index);
        self.store.install(index);
        info!(records = self.store.snapshot().record_count(), "alias index rebuilt");
        result
    }

    /// Writes the shared binary artefacts and, always last, the private
    /// cache. External write failures do not stop the cache refresh; the
    /// first error is reported after the cache is safe.
    fn write_index_artifacts(&self, index: &AliasIndex) -> Result<(), PersistError> {
        let mut first_error: Option<PersistError> = None;
        let mut note = |result: Result<(), PersistError>| {
            if let Err(e) = result {
                warn!(error = %e, "artefact write failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        };

        match encode_cbor_gz(index) {
            Ok(cbor_gz) => {
                note(
                    atomic_write(&self.layout.binary_cbor_path(), &cbor_gz)
                        .map_err(PersistError::from),
                );
                note(
                    codec::encode(
                        index,
                        codec::DATASET_ALIAS_INDEX,
                        codec::PayloadCodec::Cbor,
                        codec::PayloadCompression::Gzip,
                        index.records.len() as u32,
                    )
                    .map_err(PersistError::from)
                    .and_then(|bytes| {
                        atomic_write(&self.layout.container_path(), &bytes)
                            .map_err(PersistError::from)
                    }),
                );
                note(
                    atomic_write(&self.layout.private_cache_path(), &cbor_gz)
                        .map_err(PersistError::from),
                );
            }
            Err(e) => note(Err(e)),
        }

        first_error.map_or(Ok(()), Err)
    }
}

fn log_norm_conflicts(index: &AliasIndex) {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for record in &index.records {
        match seen.get(record.norm.as_str()) {
            Some(species) if *species != record.species_id => {
                warn!(
                    norm = %record.norm,
                    first = %species,
                    second = %record.species_id,
                    "alias norm mapped to multiple species; first mapping wins"
                );
            }
            Some(_) => {}
            None => {
                seen.insert(&record.norm, &record.species_id);
            }
        }
    }
}

/// Owns the write path for all persisted alias artefacts.
pub struct PersistencePipeline {
    shared: Arc<PipelineShared>,
    rebuild_tx: Sender<RebuildSignal>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PersistencePipeline {
    /// Spawns the debounced rebuild worker. `debounce` is the quiet period
    /// after the last mutation before a full rebuild runs.
    pub fn new(layout: StorageLayout, store: Arc<AliasStore>, debounce: Duration) -> Self {
        let shared = Arc::new(PipelineShared {
            layout,
            store,
            master_lock: Mutex::new(()),
        });
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("alias-rebuild".into())
            .spawn(move || {
                while let Ok(signal) = rx.recv() {
                    if matches!(signal, RebuildSignal::Shutdown) {
                        return;
                    }
                    // Coalesce further requests until the debounce window
                    // passes without one.
                    loop {
                        match rx.recv_timeout(debounce) {
                            Ok(RebuildSignal::Shutdown) => return,
                            Ok(RebuildSignal::Request) => continue,
                            Err(RecvTimeoutError::Timeout) => break,
                            Err(RecvTimeoutError::Disconnected) => return,
                        }
                    }
                    if let Err(e) = worker_shared.rebuild(Utc::now()) {
                        warn!(error = %e, "debounced rebuild failed");
                    }
                }
            })
            .expect("spawn alias-rebuild worker");

        Self {
            shared,
            rebuild_tx: tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Adds a user-trained alias: hot-patch memory, merge into the master,
    /// refresh the private cache, schedule a debounced rebuild.
    ///
    /// Returns `Ok(true)` when the alias is (now) present for the species,
    /// `Ok(false)` for blank input or a cross-species conflict.
    pub fn add_alias(
        &self,
        species_id: &str,
        alias_text: &str,
        canonical: &str,
        tilename: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, PersistError> {
        match self
            .shared
            .store
            .add_alias_hotpatch(species_id, alias_text, canonical, tilename)
        {
            HotpatchOutcome::InvalidInput => Ok(false),
            HotpatchOutcome::Conflict => {
                warn!(species_id, alias = alias_text, "alias already mapped to another species");
                Ok(false)
            }
            HotpatchOutcome::Duplicate => Ok(true),
            HotpatchOutcome::Added => {
                let merged = self.merge_into_master(species_id, alias_text, canonical, tilename, now);
                if merged.is_err() {
                    // Master write failed; keep the running process
                    // consistent from the in-memory snapshot.
                    let snapshot = self.shared.store.snapshot();
                    if let Ok(bytes) = encode_cbor_gz(snapshot.index()) {
                        let _ = atomic_write(&self.shared.layout.private_cache_path(), &bytes);
                    }
                }
                self.schedule_rebuild();
                merged.map(|_| true)
            }
        }
    }

    fn merge_into_master(
        &self,
        species_id: &str,
        alias_text: &str,
        canonical: &str,
        tilename: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PersistError> {
        let norm = normalise(alias_text);
        if norm.is_empty() {
            return Err(PersistError::InvalidInput("blank alias"));
        }

        let _guard = self.shared.master_lock.lock();
        let mut master = self.shared.load_master(now)?;

        let position = master
            .species
            .iter()
            .position(|s| s.species_id == species_id)
            .unwrap_or_else(|| {
                master.species.push(SpeciesEntry {
                    species_id: species_id.to_owned(),
                    canonical: canonical.to_owned(),
                    tilename: tilename.map(str::to_owned),
                    aliases: vec![AliasData::derive(canonical, AliasSource::SeedCanonical, None)],
                });
                master.species.len() - 1
            });
        let entry = &mut master.species[position];
        if !entry.has_norm(&norm) {
            entry
                .aliases
                .push(AliasData::derive(alias_text, AliasSource::UserFieldTraining, Some(now)));
        }
        master.timestamp = now;
        master.sort_species();

        atomic_write(
            &self.shared.layout.master_path(),
            &serde_json::to_vec_pretty(&master)?,
        )?;
        let bytes = encode_cbor_gz(&master.to_index())?;
        atomic_write(&self.shared.layout.private_cache_path(), &bytes)?;
        debug!(species_id, norm = %norm, "alias merged into master");
        Ok(())
    }

    /// Synchronous full rebuild of master -> binaries -> cache.
    pub fn force_rebuild(&self, now: DateTime<Utc>) -> Result<(), PersistError> {
        self.shared.rebuild(now)
    }

    /// Seeds the master on first install. Returns `Ok(true)` when a new
    /// master was written.
    pub fn seed_if_missing(
        &self,
        site_species: &[String],
        species_map: &BTreeMap<String, SpeciesInfo>,
        now: DateTime<Utc>,
    ) -> Result<bool, PersistError> {
        let _guard = self.shared.master_lock.lock();
        if self.shared.layout.master_path().is_file() {
            return Ok(false);
        }
        let master = seed_from_species(site_species, species_map, now);
        atomic_write(
            &self.shared.layout.master_path(),
            &serde_json::to_vec_pretty(&master)?,
        )?;
        let index = master.to_index();
        let result = self.shared.write_index_artifacts(&index);
        self.shared.store.install(index);
        info!(species = master.species.len(), "alias master seeded");
        result.map(|_| true)
    }

    /// Rebuilds iff the server files changed since the recorded checksum or
    /// any output artefact is missing. Returns whether a rebuild ran.
    pub fn regenerate_if_needed(
        &self,
        source_files: &[PathBuf],
        now: DateTime<Utc>,
    ) -> Result<bool, PersistError> {
        let checksum = checksum_files(source_files)?;
        let layout = &self.shared.layout;
        let artefacts_present = layout.master_path().is_file()
            && layout.binary_cbor_path().is_file()
            && layout.container_path().is_file()
            && layout.private_cache_path().is_file();

        let stored: Option<RegenerateMeta> = fs::read(layout.master_meta_path())
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());
        if artefacts_present && stored.is_some_and(|meta| meta.source_checksum == checksum) {
            return Ok(false);
        }

        self.shared.rebuild(now)?;
        let meta = RegenerateMeta {
            source_checksum: checksum,
            source_files: source_files
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            timestamp: now,
        };
        atomic_write(&layout.master_meta_path(), &serde_json::to_vec_pretty(&meta)?)?;
        Ok(true)
    }

    /// Asks the worker for a rebuild after the debounce window.
    pub fn schedule_rebuild(&self) {
        let _ = self.rebuild_tx.send(RebuildSignal::Request);
    }

    /// Stops the rebuild worker. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.rebuild_tx.send(RebuildSignal::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PersistencePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// SHA-256 over the concatenation of the given files, in the given order.
fn checksum_files(paths: &[PathBuf]) -> Result<String, PersistError> {
    let mut hasher = Sha256::new();
    for path in paths {
        hasher.update(fs::read(path)?);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{master_of, species};
    use std::time::Duration;

    fn epoch() -> DateTime<Utc> {
        DateTime::UNIX_EPOCH
    }

    fn pipeline_with_master(
        debounce: Duration,
    ) -> (PersistencePipeline, Arc<AliasStore>, StorageLayout, tempfile::TempDir) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = StorageLayout::new(tmp.path().join("shared"), tmp.path().join("priv"));
        layout.ensure_directories().expect("mkdirs");
        let master = master_of(vec![
            species("20", "Aalscholver", Some("Aal"), &[]),
            species("30", "Boerenzwaluw", None, &[]),
        ]);
        fs::write(
            layout.master_path(),
            serde_json::to_vec_pretty(&master).expect("json"),
        )
        .expect("write master");

        let store = Arc::new(AliasStore::new(layout.clone()));
        store.ensure_loaded().expect("load");
        let pipeline = PersistencePipeline::new(layout.clone(), store.clone(), debounce);
        (pipeline, store, layout, tmp)
    }

    #[test]
    fn atomic_write_replaces_and_cleans_up() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("out.json");
        atomic_write(&path, b"one").expect("write");
        atomic_write(&path, b"two").expect("rewrite");
        assert_eq!(fs::read(&path).expect("read"), b"two");
        assert!(
            fs::read_dir(tmp.path())
                .expect("dir")
                .all(|e| e.expect("entry").file_name() == "out.json"),
            "no temp siblings left behind"
        );
    }

    #[test]
    fn cbor_gz_round_trips() {
        let master = master_of(vec![species("20", "Aalscholver", None, &["aal"])]);
        let index = master.to_index();
        let bytes = encode_cbor_gz(&index).expect("encode");
        let back: AliasIndex = decode_cbor_gz(&bytes).expect("decode");
        assert_eq!(index, back);
    }

    #[test]
    fn add_alias_updates_master_cache_and_memory() {
        let (pipeline, store, layout, _tmp) = pipeline_with_master(Duration::from_millis(20));

        let added = pipeline
            .add_alias("20", "bui", "Aalscholver", None, epoch())
            .expect("add");
        assert!(added);
        assert_eq!(store.snapshot().find_exact("bui").len(), 1);

        let master: AliasMaster =
            serde_json::from_slice(&fs::read(layout.master_path()).expect("read")).expect("parse");
        let entry = master
            .species
            .iter()
            .find(|s| s.species_id == "20")
            .expect("species");
        assert!(entry.has_norm("bui"));
        assert!(layout.private_cache_path().is_file());

        pipeline.shutdown();
    }

    #[test]
    fn add_alias_is_idempotent_and_rejects_conflicts() {
        let (pipeline, store, _layout, _tmp) = pipeline_with_master(Duration::from_millis(20));

        assert!(pipeline
            .add_alias("20", "bui", "Aalscholver", None, epoch())
            .expect("first"));
        assert!(pipeline
            .add_alias("20", "bui", "Aalscholver", None, epoch())
            .expect("second"));
        assert_eq!(store.snapshot().find_exact("bui").len(), 1);

        // Same norm for another species is refused.
        assert!(!pipeline
            .add_alias("30", "bui", "Boerenzwaluw", None, epoch())
            .expect("conflict"));
        // Blank input is refused.
        assert!(!pipeline
            .add_alias("30", "  ", "Boerenzwaluw", None, epoch())
            .expect("blank"));

        pipeline.shutdown();
    }

    #[test]
    fn force_rebuild_writes_every_artifact() {
        let (pipeline, _store, layout, _tmp) = pipeline_with_master(Duration::from_secs(60));

        pipeline.force_rebuild(epoch()).expect("rebuild");
        assert!(layout.binary_cbor_path().is_file());
        assert!(layout.container_path().is_file());
        assert!(layout.private_cache_path().is_file());

        let bytes = fs::read(layout.container_path()).expect("read container");
        let index: AliasIndex =
            codec::decode(&bytes, codec::DATASET_ALIAS_INDEX).expect("container decodes");
        assert!(!index.records.is_empty());

        pipeline.shutdown();
    }

    #[test]
    fn scheduled_rebuild_is_debounced() {
        let (pipeline, _store, layout, _tmp) = pipeline_with_master(Duration::from_millis(50));
        assert!(!layout.container_path().is_file());

        pipeline.schedule_rebuild();
        pipeline.schedule_rebuild();
        pipeline.schedule_rebuild();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !layout.container_path().is_file() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(layout.container_path().is_file(), "debounced rebuild ran");

        pipeline.shutdown();
    }

    #[test]
    fn regenerate_tracks_source_checksum() {
        let (pipeline, _store, layout, tmp) = pipeline_with_master(Duration::from_secs(60));
        let source = tmp.path().join("site_species.json");
        fs::write(&source, b"[\"20\",\"30\"]").expect("write source");
        let sources = vec![source.clone()];

        assert!(pipeline
            .regenerate_if_needed(&sources, epoch())
            .expect("first run"));
        assert!(layout.master_meta_path().is_file());
        assert!(!pipeline
            .regenerate_if_needed(&sources, epoch())
            .expect("unchanged"));

        fs::write(&source, b"[\"20\"]").expect("change source");
        assert!(pipeline
            .regenerate_if_needed(&sources, epoch())
            .expect("changed"));

        pipeline.shutdown();
    }

    #[test]
    fn seeding_only_happens_once() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = StorageLayout::new(tmp.path().join("shared"), tmp.path().join("priv"));
        layout.ensure_directories().expect("mkdirs");
        let store = Arc::new(AliasStore::new(layout.clone()));
        let pipeline =
            PersistencePipeline::new(layout.clone(), store.clone(), Duration::from_secs(60));

        let mut map = BTreeMap::new();
        map.insert(
            "20".to_owned(),
            SpeciesInfo {
                canonical: "Aalscholver".to_owned(),
                tilename: None,
            },
        );
        let site = vec!["20".to_owned()];

        assert!(pipeline.seed_if_missing(&site, &map, epoch()).expect("seed"));
        assert!(layout.master_path().is_file());
        assert_eq!(store.snapshot().find_exact("aalscholver").len(), 1);
        assert!(!pipeline
            .seed_if_missing(&site, &map, epoch())
            .expect("second"));

        pipeline.shutdown();
    }
}
