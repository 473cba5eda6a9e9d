//! Filesystem layout of the persisted alias artefacts.

use std::io;
use std::path::{Path, PathBuf};

/// Resolves every persisted artefact path from two roots: the shared storage
/// root the host exposes, and a process-private writable area.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    private_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>, private_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            private_dir: private_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn private_dir(&self) -> &Path {
        &self.private_dir
    }

    /// Canonical human-readable master document.
    pub fn master_path(&self) -> PathBuf {
        self.root.join("assets").join("alias_master.json")
    }

    /// Sidecar recording the server-file checksum behind the last rebuild.
    pub fn master_meta_path(&self) -> PathBuf {
        self.root.join("assets").join("alias_master.meta.json")
    }

    /// GZIP+CBOR index in the shared binaries directory.
    pub fn binary_cbor_path(&self) -> PathBuf {
        self.root.join("binaries").join("aliases_optimized.cbor.gz")
    }

    /// VT5BIN10 container in the serverdata directory.
    pub fn container_path(&self) -> PathBuf {
        self.root.join("serverdata").join("alias_index.bin")
    }

    /// Process-private copy of the CBOR index; the running process treats
    /// this as durable truth.
    pub fn private_cache_path(&self) -> PathBuf {
        self.private_dir.join("aliases_optimized.cbor.gz")
    }

    /// Persisted usage-score snapshot.
    pub fn usage_state_path(&self) -> PathBuf {
        self.private_dir.join("usage_scores.json")
    }

    /// Line-delimited JSON match audit log.
    pub fn audit_log_path(&self) -> PathBuf {
        self.private_dir.join("match_audit.jsonl")
    }

    /// Creates every directory the layout needs.
    pub fn ensure_directories(&self) -> io::Result<()> {
        for dir in [
            self.root.join("assets"),
            self.root.join("binaries"),
            self.root.join("serverdata"),
            self.private_dir.clone(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
