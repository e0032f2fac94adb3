//! Aggregation pipeline error types.

use thiserror::Error;

/// Errors raised by the writer, rollup engine, or reader.
#[derive(Error, Debug)]
pub enum AggregateError {
    /// Store round-trip failed; the caller retries the whole operation
    #[error("Storage error: {0}")]
    Storage(#[from] central_storage::StorageError),

    /// Submitted aggregate violates an invariant (fatal for the call)
    #[error("Invalid aggregate: {0}")]
    InvalidAggregate(String),
}
