//! Error types for the chain core.

use thiserror::Error;

/// Fatal chain-core errors. Consensus violations are NOT errors; they are
/// reported through verification contexts.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Storage fault; the store is presumed unusable.
    #[error("Storage error: {0}")]
    Storage(#[from] umbra_storage::StorageError),

    /// Consensus machinery fault (not a rule violation).
    #[error("Consensus error: {0}")]
    Consensus(#[from] umbra_consensus::ConsensusError),

    /// Blob decode fault on locally stored data.
    #[error("Codec error: {0}")]
    Codec(#[from] umbra_types::CodecError),

    /// The core reached a state it cannot recover from.
    #[error("Fatal: {0}")]
    Fatal(String),
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
