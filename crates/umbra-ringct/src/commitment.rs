//! Pedersen commitments.
//!
//! A commitment to amount `a` with blinding `x` is `x·G + a·H`, where `G` is
//! the Ristretto basepoint and `H` is the default Bulletproofs blinding
//! generator. Putting the blinding on the basepoint keeps commitment
//! differences (`C - C'` for equal amounts) in the key space the MLSAG ring
//! signs over.

use crate::keys::Commitment;
use bulletproofs::PedersenGens;
use curve25519_dalek_ng::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek_ng::ristretto::RistrettoPoint;
use curve25519_dalek_ng::scalar::Scalar;

/// Generators arranged so that `commit(value, blinding) = blinding·G + value·H`.
pub fn pedersen_gens() -> PedersenGens {
    let default = PedersenGens::default();
    PedersenGens {
        B: default.B_blinding,
        B_blinding: RISTRETTO_BASEPOINT_POINT,
    }
}

/// Commit to `amount` with blinding factor `blinding`.
pub fn commit(amount: u64, blinding: &Scalar) -> RistrettoPoint {
    pedersen_gens().commit(Scalar::from(amount), *blinding)
}

/// The deterministic commitment used for plaintext-amount outputs:
/// `zero_commit(a) = 1·G + a·H`.
pub fn zero_commit(amount: u64) -> Commitment {
    Commitment::from_point(&commit(amount, &Scalar::one()))
}

/// The fee term `fee·H` subtracted when balancing commitments.
pub fn fee_commitment(fee: u64) -> RistrettoPoint {
    pedersen_gens().B * Scalar::from(fee)
}

/// The key a commitment-to-zero reduces to: `x·G`.
///
/// Used when building the commitment row of a ring matrix; the signer knows
/// the blinding difference `x` and this is its public image.
pub fn commitment_to_zero_key(blinding: &Scalar) -> RistrettoPoint {
    RISTRETTO_BASEPOINT_POINT * blinding
}
