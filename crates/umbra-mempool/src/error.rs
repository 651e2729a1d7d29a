//! Error types for the transaction pool.

use thiserror::Error;

/// Pool-specific errors.
#[derive(Error, Debug)]
pub enum MempoolError {
    /// Transaction already pooled.
    #[error("Transaction already in pool: {0}")]
    AlreadyExists(String),

    /// Transaction not pooled.
    #[error("Transaction not in pool: {0}")]
    NotFound(String),

    /// An input's key image is already claimed by a pooled transaction.
    #[error("Key image already claimed in pool: {0}")]
    DoubleSpend(String),
}

/// Result type for pool operations.
pub type MempoolResult<T> = Result<T, MempoolError>;
