//! Error types surfaced by the drift-detection engine.

use thiserror::Error;

/// Errors the core raises to its caller.
///
/// Validation and backpressure errors are reported synchronously at
/// ingest time; store errors propagate from synchronous reads and from
/// the background worker (which logs and drops the offending sample
/// instead of halting).
#[derive(Debug, Error)]
pub enum DriftError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("ingestion queue is full")]
    Backpressure,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DriftError>;
