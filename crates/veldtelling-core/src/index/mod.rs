//! The alias index: in-memory store, persisted artefacts and seeding.
//!
//! Three tiers of persistence back one in-memory snapshot:
//!
//! 1. `assets/alias_master.json` — canonical, pretty-printed, human-editable.
//! 2. `binaries/aliases_optimized.cbor.gz` and `serverdata/alias_index.bin`
//!    (VT5BIN10) — fast reload forms.
//! 3. A process-private copy of the CBOR artefact — written last on every
//!    mutation, so the running process always has a recent snapshot even
//!    when external storage misbehaves.

mod layout;
mod persistence;
mod seed;
mod store;

pub use layout::StorageLayout;
pub use persistence::{PersistencePipeline, RegenerateMeta};
pub use seed::seed_from_species;
pub use store::{AliasStore, HotpatchOutcome, IndexSnapshot};
