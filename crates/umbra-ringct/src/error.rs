//! Error types for the ring-signature layer.

use thiserror::Error;

/// Ring-signature and commitment errors.
#[derive(Error, Debug)]
pub enum RctError {
    /// A 32-byte key failed to decompress to a group element.
    #[error("Invalid group element: {0}")]
    InvalidPoint(String),

    /// A 32-byte scalar was not canonical.
    #[error("Non-canonical scalar")]
    InvalidScalar,

    /// Ring matrix dimensions do not agree.
    #[error("Malformed ring: {0}")]
    MalformedRing(String),

    /// Signature dimensions do not agree with the ring.
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    /// The ring signature did not verify.
    #[error("Ring signature verification failed")]
    BadSignature,

    /// A range proof failed to verify or deserialize.
    #[error("Range proof error: {0}")]
    RangeProof(String),

    /// Commitments do not balance.
    #[error("Commitments do not balance")]
    Unbalanced,
}

/// Result type for ring-signature operations.
pub type RctResult<T> = Result<T, RctError>;
