//! Error types for consensus validation.

use thiserror::Error;

/// Consensus validation errors.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// Block major version not permitted at its height.
    #[error("Bad block version {version} at height {height}")]
    BadVersion { version: u8, height: u64 },

    /// Timestamp outside the accepted range.
    #[error("Bad timestamp: {0}")]
    BadTimestamp(String),

    /// Proof of work below target.
    #[error("Proof of work does not meet difficulty {difficulty}")]
    BadProofOfWork { difficulty: u128 },

    /// Hash disagrees with a hard-coded checkpoint.
    #[error("Checkpoint mismatch at height {height}")]
    BadCheckpoint { height: u64 },

    /// Malformed coinbase transaction.
    #[error("Bad coinbase: {0}")]
    BadCoinbase(String),

    /// Coinbase claims more than subsidy plus fees, or the dev-fund split
    /// is wrong.
    #[error("Bad block reward: {0}")]
    BadReward(String),

    /// Transaction violates a structural rule.
    #[error("Bad transaction structure: {0}")]
    BadTxStructure(String),

    /// Oversize block.
    #[error("Block size {size} exceeds limit {limit}")]
    BlockTooLarge { size: u64, limit: u64 },

    /// Difficulty computation produced no usable value.
    #[error("Difficulty overhead")]
    DifficultyOverhead,

    /// Bad compiled-in hash-of-hashes data.
    #[error("Invalid hash-of-hashes data: {0}")]
    InvalidHashData(String),

    /// Malformed checkpoint definition.
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    /// Blob decode error.
    #[error("Codec error: {0}")]
    Codec(#[from] umbra_types::CodecError),

    /// Ring-signature layer error.
    #[error("RingCT error: {0}")]
    Rct(#[from] umbra_ringct::RctError),

    /// Storage error (fatal).
    #[error("Storage error: {0}")]
    Storage(#[from] umbra_storage::StorageError),
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
