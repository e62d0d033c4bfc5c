//! Error types for engine operations.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur at the engine capability surface.
///
/// These are the failures a real engine binding reports back through the
/// façade traits. The proxy layer propagates them unchanged; it never
/// logs or swallows them.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The underlying engine reported a failure.
    #[error("engine backend failure: {message}")]
    Backend {
        /// Description of the failure as reported by the engine.
        message: String,
    },

    /// A write operation was issued with no active write transaction.
    #[error("no write transaction is active on this thread")]
    NoActiveTransaction,

    /// A write transaction was begun while one is already active on the
    /// calling thread.
    #[error("a write transaction is already active on this thread")]
    NestedTransaction,

    /// A backlink query named a field the engine has no binding for.
    #[error("unknown backlink field: {field}")]
    UnknownBacklinkField {
        /// The field name that was requested.
        field: String,
    },
}

impl EngineError {
    /// Creates a backend failure error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates an unknown backlink field error.
    pub fn unknown_backlink_field(field: impl Into<String>) -> Self {
        Self::UnknownBacklinkField {
            field: field.into(),
        }
    }
}
