//! Host-facing engine facade.
//!
//! One `TallyEngine` owns the store, the persistence pipeline, the
//! orchestrator, the usage scores and the audit log, and exposes the small
//! API the host (UI, session manager) talks to. Matching calls never fail;
//! persistence calls report errors, which `add_alias` folds into its `bool`
//! contract.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::audit::{AuditLog, AuditRecord};
use crate::config::EngineConfig;
use crate::error::PersistError;
use crate::index::{AliasStore, PersistencePipeline, StorageLayout};
use crate::matcher;
use crate::orchestrator::{Orchestrator, PendingListener};
use crate::types::{MatchContext, MatchResult, SpeciesInfo};
use crate::usage::UsageScoreStore;

/// Species data for first-install seeding.
#[derive(Debug, Clone, Default)]
pub struct SeedData {
    /// Species ids allowed at the site.
    pub site_species: Vec<String>,
    /// Display data per species id.
    pub species_map: BTreeMap<String, SpeciesInfo>,
}

pub struct TallyEngine {
    config: Arc<EngineConfig>,
    store: Arc<AliasStore>,
    pipeline: PersistencePipeline,
    orchestrator: Orchestrator,
    usage: UsageScoreStore,
    audit: Arc<AuditLog>,
}

impl TallyEngine {
    /// Ensures the directory layout, seeds the master on first install and
    /// loads the index. A missing index is not fatal: matching degrades to
    /// no-match results until a rebuild succeeds.
    pub fn initialize(
        layout: StorageLayout,
        config: EngineConfig,
        seed: Option<SeedData>,
    ) -> Result<Self, PersistError> {
        layout.ensure_directories()?;
        let config = Arc::new(config);
        let store = Arc::new(AliasStore::new(layout.clone()));
        let pipeline =
            PersistencePipeline::new(layout.clone(), store.clone(), config.rebuild_debounce);

        if let Some(seed) = &seed {
            if pipeline.seed_if_missing(&seed.site_species, &seed.species_map, Utc::now())? {
                info!(species = seed.site_species.len(), "first-install seed complete");
            }
        }
        match store.ensure_loaded() {
            Ok(()) => info!(records = store.snapshot().record_count(), "alias index ready"),
            Err(e) => warn!(error = %e, "alias index unavailable; matching degrades to no-match"),
        }

        let audit = Arc::new(AuditLog::open(
            layout.audit_log_path(),
            config.audit_ceiling_bytes,
        ));
        let orchestrator = Orchestrator::new(store.clone(), config.clone(), audit.clone());
        let usage = UsageScoreStore::new(Some(layout.usage_state_path()));

        Ok(Self {
            config,
            store,
            pipeline,
            orchestrator,
            usage,
            audit,
        })
    }

    /// Teaches the engine a new surface form for a species.
    ///
    /// Idempotent; returns `false` only for blank input, a cross-species
    /// conflict or an outright persistence failure.
    pub fn add_alias(
        &self,
        species_id: &str,
        alias_text: &str,
        canonical: &str,
        tilename: Option<&str>,
    ) -> bool {
        match self
            .pipeline
            .add_alias(species_id, alias_text, canonical, tilename, Utc::now())
        {
            Ok(added) => added,
            Err(e) => {
                warn!(species_id, alias = alias_text, error = %e, "add_alias failed");
                false
            }
        }
    }

    /// Species ids and canonical names known to the loaded index.
    pub fn get_all_species(&self) -> BTreeMap<String, String> {
        self.store
            .snapshot()
            .all_species()
            .iter()
            .map(|(id, info)| (id.clone(), info.canonical.clone()))
            .collect()
    }

    pub fn species_display_name(&self, species_id: &str) -> Option<String> {
        self.store
            .snapshot()
            .all_species()
            .get(species_id)
            .map(|info| info.canonical.clone())
    }

    /// Runs the exact/fuzzy cascade over one hypothesis.
    pub fn match_hypothesis(&self, hypothesis: &str, context: &MatchContext) -> MatchResult {
        let snapshot = self.store.snapshot();
        let result = matcher::match_hypothesis(
            &snapshot,
            hypothesis,
            context,
            &self.config.match_options,
        );
        self.audit.record(&AuditRecord::of(
            hypothesis,
            Some(self.orchestrator.session_id()),
            &[(hypothesis.to_owned(), 1.0)],
            &result,
        ));
        result
    }

    /// Fuses an N-best hypothesis list; see the orchestrator module docs.
    /// `asr_weight` defaults to the configured weight when `None`.
    pub fn parse_hypotheses(
        &self,
        hypotheses: &[(String, f64)],
        context: &MatchContext,
        partials: bool,
        asr_weight: Option<f64>,
    ) -> MatchResult {
        let weight = asr_weight.unwrap_or(self.config.asr_weight);
        self.orchestrator
            .parse_hypotheses(hypotheses, context, partials, weight)
    }

    /// Registers the callback for asynchronously resolved pending matches.
    pub fn set_pending_result_listener(&self, listener: PendingListener) {
        self.orchestrator.set_pending_result_listener(listener);
    }

    /// Records that the user counted a species; feeds the recency prior.
    pub fn record_use(&self, species_id: &str) {
        self.usage.record_use(species_id);
    }

    /// Most recently used species, newest first.
    pub fn recent_species(&self, limit: usize) -> Vec<String> {
        self.usage.recents(limit)
    }

    /// Species ranked by decayed usage score.
    pub fn top_species(&self, limit: usize) -> Vec<(String, f64)> {
        self.usage.top_species(limit)
    }

    /// Opens a new listening session; cancels in-flight parses of the
    /// previous one.
    pub fn start_session(&self) -> u64 {
        let id = self.orchestrator.start_session();
        self.usage.start_session(id);
        id
    }

    /// Cancels the current parse immediately.
    pub fn stop_listening(&self) {
        self.orchestrator.stop_listening();
    }

    /// Synchronous full rebuild: master, binary artefacts, private cache.
    pub fn force_rebuild(&self) -> Result<(), PersistError> {
        self.pipeline.force_rebuild(Utc::now())
    }

    /// Rebuilds when the host's server files changed or artefacts are
    /// missing. Returns whether a rebuild ran.
    pub fn regenerate_if_needed(&self, source_files: &[PathBuf]) -> Result<bool, PersistError> {
        self.pipeline.regenerate_if_needed(source_files, Utc::now())
    }

    /// Re-reads the index from the persisted priority chain.
    pub fn reload_index(&self) -> Result<(), PersistError> {
        self.store.reload_index()
    }

    /// Stops all worker threads. Called automatically on drop.
    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
        self.pipeline.shutdown();
        self.audit.shutdown();
    }
}

impl Drop for TallyEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
