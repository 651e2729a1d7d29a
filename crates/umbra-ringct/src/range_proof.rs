//! 64-bit range proofs over Pedersen commitments.
//!
//! Two forms are used by the transaction formats: one proof per output
//! (pre-bulletproof signature types) and one aggregated proof covering every
//! output of a transaction (the bulletproof type). Aggregated proofs are
//! padded to the next power of two with commitments to zero.

use crate::commitment::pedersen_gens;
use crate::keys::Commitment;
use crate::{RctError, RctResult};
use bulletproofs::{BulletproofGens, RangeProof};
use curve25519_dalek_ng::ristretto::CompressedRistretto;
use curve25519_dalek_ng::scalar::Scalar;
use merlin::Transcript;
use serde::{Deserialize, Serialize};

const RANGE_BITS: usize = 64;
const TRANSCRIPT_LABEL: &[u8] = b"umbra.range_proof";

/// Maximum number of commitments one aggregated proof may cover.
pub const MAX_AGGREGATION: usize = 64;

/// A serialized range proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeProofBytes(pub Vec<u8>);

fn gens() -> BulletproofGens {
    BulletproofGens::new(RANGE_BITS, MAX_AGGREGATION)
}

fn transcript(message: &[u8; 32]) -> Transcript {
    let mut t = Transcript::new(TRANSCRIPT_LABEL);
    t.append_message(b"tx", message);
    t
}

/// Prove one commitment is to a 64-bit value. Returns the proof and the
/// commitment it binds.
pub fn prove_single(
    amount: u64,
    blinding: &Scalar,
    message: &[u8; 32],
) -> RctResult<(RangeProofBytes, Commitment)> {
    let (proof, commitment) = RangeProof::prove_single(
        &gens(),
        &pedersen_gens(),
        &mut transcript(message),
        amount,
        blinding,
        RANGE_BITS,
    )
    .map_err(|e| RctError::RangeProof(e.to_string()))?;
    Ok((
        RangeProofBytes(proof.to_bytes()),
        Commitment(commitment.to_bytes()),
    ))
}

/// Verify a single-output range proof.
pub fn verify_single(
    proof: &RangeProofBytes,
    commitment: &Commitment,
    message: &[u8; 32],
) -> RctResult<()> {
    let proof = RangeProof::from_bytes(&proof.0)
        .map_err(|e| RctError::RangeProof(format!("decode: {}", e)))?;
    proof
        .verify_single(
            &gens(),
            &pedersen_gens(),
            &mut transcript(message),
            &CompressedRistretto(commitment.0),
            RANGE_BITS,
        )
        .map_err(|e| RctError::RangeProof(e.to_string()))
}

fn padded_len(n: usize) -> usize {
    n.next_power_of_two()
}

/// Prove that every amount is a 64-bit value, in one aggregated proof.
/// Returns the proof and the real (unpadded) commitments in order.
pub fn prove_aggregate(
    amounts: &[u64],
    blindings: &[Scalar],
    message: &[u8; 32],
) -> RctResult<(RangeProofBytes, Vec<Commitment>)> {
    if amounts.is_empty() || amounts.len() != blindings.len() {
        return Err(RctError::RangeProof("mismatched amounts/blindings".into()));
    }
    if amounts.len() > MAX_AGGREGATION {
        return Err(RctError::RangeProof(format!(
            "too many outputs for one proof: {}",
            amounts.len()
        )));
    }

    let real = amounts.len();
    let padded = padded_len(real);
    let mut values = amounts.to_vec();
    let mut blinds = blindings.to_vec();
    values.resize(padded, 0);
    blinds.resize(padded, Scalar::zero());

    let (proof, commitments) = RangeProof::prove_multiple(
        &gens(),
        &pedersen_gens(),
        &mut transcript(message),
        &values,
        &blinds,
        RANGE_BITS,
    )
    .map_err(|e| RctError::RangeProof(e.to_string()))?;

    Ok((
        RangeProofBytes(proof.to_bytes()),
        commitments
            .into_iter()
            .take(real)
            .map(|c| Commitment(c.to_bytes()))
            .collect(),
    ))
}

/// Verify an aggregated proof against the transaction's output commitments.
pub fn verify_aggregate(
    proof: &RangeProofBytes,
    commitments: &[Commitment],
    message: &[u8; 32],
) -> RctResult<()> {
    if commitments.is_empty() {
        return Err(RctError::RangeProof("no commitments".into()));
    }
    if commitments.len() > MAX_AGGREGATION {
        return Err(RctError::RangeProof(format!(
            "too many commitments: {}",
            commitments.len()
        )));
    }

    // Padding slots are commitments to zero with zero blinding, whose
    // compressed encoding is the identity.
    let mut compressed: Vec<CompressedRistretto> = commitments
        .iter()
        .map(|c| CompressedRistretto(c.0))
        .collect();
    compressed.resize(padded_len(commitments.len()), CompressedRistretto([0u8; 32]));

    let proof = RangeProof::from_bytes(&proof.0)
        .map_err(|e| RctError::RangeProof(format!("decode: {}", e)))?;
    proof
        .verify_multiple(
            &gens(),
            &pedersen_gens(),
            &mut transcript(message),
            &compressed,
            RANGE_BITS,
        )
        .map_err(|e| RctError::RangeProof(e.to_string()))
}
