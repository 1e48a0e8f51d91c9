//! Error types for the replica engine.

use crate::durable::DurableError;
use crate::store::StoreError;
use syncro_types::PathError;
use thiserror::Error;

/// Result type for replica operations.
pub type SyncroResult<T> = Result<T, SyncroError>;

/// Errors that can occur in replica operations.
#[derive(Debug, Error)]
pub enum SyncroError {
    /// The session path does not match the grammar.
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// The path names an entity with no registered handler. Fatal, never retried.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// The reactive adapter does not satisfy the mount contract.
    #[error("reactive adapter contract violated: {0}")]
    AdapterContract(String),

    /// Every mount attempt failed; carries the last attempt's error.
    #[error("mount failed after {attempts} attempts: {source}")]
    MountExhausted {
        attempts: u32,
        #[source]
        source: Box<SyncroError>,
    },

    /// Internal consistency failure. Loud by design; should be unreachable.
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    /// Operation issued in a lifecycle state that cannot serve it.
    #[error("replica lifecycle: {0}")]
    Lifecycle(String),

    /// Real-time document store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Durable store failure, normalized to its `{code, message}` shape.
    #[error(transparent)]
    Durable(#[from] DurableError),

    /// Registry service answered with a non-success status.
    #[error("registry service returned {status} for {url}")]
    Registry { status: u16, url: String },

    /// Transport-level HTTP failure talking to the registry service.
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncroError {
    /// Whether a write failing with this error may be recovered by asking
    /// the registry service to reinitialize the path.
    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound { .. }))
    }
}
