//! Error types for the storage layer.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB error.
    #[error("Database error: {0}")]
    Database(#[from] rocksdb::Error),

    /// Blob decode error.
    #[error("Codec error: {0}")]
    Codec(#[from] umbra_types::CodecError),

    /// Column family not found.
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// A key image being committed is already spent. Demoted to a block
    /// verification failure by the caller; every other variant is fatal.
    #[error("Key image already spent: {0}")]
    KeyImageExists(String),

    /// Expected record absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Store contents contradict themselves.
    #[error("Store inconsistency: {0}")]
    Inconsistent(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
