//! Error types for relation operations.

use entilink_engine::EngineError;
use thiserror::Error;

/// Result type for relation operations.
pub type RelationResult<T> = Result<T, RelationError>;

/// Errors that can occur in relation proxy operations.
#[derive(Debug, Error)]
pub enum RelationError {
    /// The host entity has not been persisted yet.
    ///
    /// Applying relation changes requires a host id; put the host
    /// first and retry. The proxy's local buffer is left unchanged.
    #[error("host entity has not been persisted; put the host before applying relation changes")]
    UnsavedHost,

    /// The engine reported a read or write failure.
    ///
    /// During reconciliation the write transaction is rolled back
    /// before this is returned, so a retry recomputes the same diff.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}
