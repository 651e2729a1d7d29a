//! # umbra-ringct
//!
//! Ring-signature and confidential-amount primitives for the Umbra node.
//!
//! This crate provides:
//! - Pedersen commitments over the Ristretto group
//! - MLSAG ring signatures (sign + verify) with key images
//! - Aggregated 64-bit range proofs (Bulletproofs)
//! - One-time output keys and view-key derivations
//!
//! The chain core consumes these through small, explicit entry points; no
//! consensus policy lives here.

mod commitment;
mod error;
mod keys;
mod mlsag;
mod range_proof;

pub use commitment::{commit, commitment_to_zero_key, fee_commitment, pedersen_gens, zero_commit};
pub use error::{RctError, RctResult};
pub use keys::{
    derive_public_key, derive_secret_key, generate_key_derivation, hash_to_point, hash_to_scalar,
    key_image, random_scalar, Commitment, KeyDerivation, KeyImage, KeyPair, PublicKey, SecretKey,
};
pub use mlsag::{MlsagSignature, RingMatrix};
pub use range_proof::{prove_aggregate, prove_single, verify_aggregate, verify_single, RangeProofBytes};
