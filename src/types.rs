//! Crate-wide error type.

use thiserror::Error;

/// Errors produced by chunking, storage, and retrieval operations.
///
/// The variants form a closed set: callers can match exhaustively to decide
/// whether a failure is a caller bug (`InvalidParameter`, the `Unsupported*`
/// family), a hard storage fault, or a degraded-capability signal
/// (`ModelUnavailable`). Strategies that define a fallback never surface
/// `ModelUnavailable` to the caller; everything else propagates.
#[derive(Debug, Error)]
pub enum RagError {
    /// Malformed or contradictory parameters. Never retried.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unknown chunking method name.
    #[error("unsupported chunking method '{0}'")]
    UnsupportedMethod(String),

    /// Unknown similarity metric name.
    #[error("unsupported similarity metric '{0}'")]
    UnsupportedMetric(String),

    /// Unknown vector store backend name.
    #[error("unsupported vector store backend '{0}'")]
    UnsupportedBackend(String),

    /// A vector's length does not match the store's fixed dimension.
    /// Fatal for the `add` that raised it.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The embedding provider could not produce vectors.
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// Backend storage failure (database, index, or persisted artifacts).
    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Io(err.to_string())
    }
}
