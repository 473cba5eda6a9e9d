//! Error types for index storage and persistence.
//!
//! # Error Handling Strategy
//!
//! Two complementary patterns are used:
//!
//! - [`PersistError`]: failures while loading or writing alias artefacts.
//!   Returned as `Result<T, PersistError>` from the store and the
//!   persistence pipeline. Readers downgrade along the source priority
//!   chain before giving up; writers fall back to the process-private cache.
//!
//! - [`crate::types::MatchResult`]: matching itself never fails. Missing
//!   indexes, timeouts and saturated buffers are encoded as `NoMatch`
//!   results with a descriptive `source` tag, so the host always gets a
//!   well-formed outcome.

use thiserror::Error;

use crate::codec::CodecError;

/// Failure while reading or writing persisted alias data.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cbor error: {0}")]
    Cbor(String),

    #[error("container error: {0}")]
    Codec(#[from] CodecError),

    /// No source in the load priority chain produced an index.
    #[error("no alias index source available")]
    IndexUnavailable,

    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}
