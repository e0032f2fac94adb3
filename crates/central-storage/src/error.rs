//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Row encoding/decoding error
    #[error("Codec error: {0}")]
    Codec(String),

    /// Rollup level outside the configured range
    #[error("Unknown rollup level: {0}")]
    UnknownLevel(usize),
}

impl From<Box<bincode::ErrorKind>> for StorageError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        StorageError::Codec(err.to_string())
    }
}
