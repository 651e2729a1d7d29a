//! Key types and derivations.
//!
//! All group arithmetic is over the Ristretto group. Wire and storage forms
//! are the 32-byte compressed encodings; decompression failures surface as
//! [`RctError::InvalidPoint`] so callers can treat malformed keys as
//! validation failures rather than panics.

use crate::{RctError, RctResult};
use blake2::{Blake2b512, Digest};
use curve25519_dalek_ng::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek_ng::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek_ng::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// A compressed public key (one-time output key, tx pubkey, spend/view key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

/// A compressed Pedersen commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commitment(pub [u8; 32]);

/// A key image: the one-time spend tag of an output.
///
/// Ordered by byte value; strict-semantics input sorting relies on `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyImage(pub [u8; 32]);

/// A secret scalar.
#[derive(Clone)]
pub struct SecretKey(pub Scalar);

/// A shared-secret point produced by [`generate_key_derivation`].
#[derive(Debug, Clone, Copy)]
pub struct KeyDerivation(pub RistrettoPoint);

/// A secret/public key pair.
#[derive(Clone)]
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl PublicKey {
    /// Decompress into a group element, rejecting invalid encodings.
    pub fn point(&self) -> RctResult<RistrettoPoint> {
        CompressedRistretto(self.0)
            .decompress()
            .ok_or_else(|| RctError::InvalidPoint(hex::encode(self.0)))
    }

    /// Whether the encoding is a valid group element.
    pub fn is_valid(&self) -> bool {
        CompressedRistretto(self.0).decompress().is_some()
    }

    pub fn from_point(p: &RistrettoPoint) -> Self {
        Self(p.compress().to_bytes())
    }
}

impl Commitment {
    pub fn point(&self) -> RctResult<RistrettoPoint> {
        CompressedRistretto(self.0)
            .decompress()
            .ok_or_else(|| RctError::InvalidPoint(hex::encode(self.0)))
    }

    pub fn from_point(p: &RistrettoPoint) -> Self {
        Self(p.compress().to_bytes())
    }
}

impl KeyImage {
    pub fn point(&self) -> RctResult<RistrettoPoint> {
        CompressedRistretto(self.0)
            .decompress()
            .ok_or_else(|| RctError::InvalidPoint(hex::encode(self.0)))
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Display for KeyImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl KeyPair {
    /// Generate a fresh key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = random_scalar(rng);
        let public = PublicKey::from_point(&(RISTRETTO_BASEPOINT_POINT * secret));
        Self {
            secret: SecretKey(secret),
            public,
        }
    }

    /// Rebuild a pair from a known secret scalar.
    pub fn from_secret(secret: Scalar) -> Self {
        let public = PublicKey::from_point(&(RISTRETTO_BASEPOINT_POINT * secret));
        Self {
            secret: SecretKey(secret),
            public,
        }
    }
}

/// Sample a uniformly random scalar.
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    let mut wide = [0u8; 64];
    rng.fill_bytes(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Hash arbitrary data to a scalar (wide reduction over Blake2b-512).
pub fn hash_to_scalar(domain: &[u8], data: &[&[u8]]) -> Scalar {
    let mut h = Blake2b512::new();
    h.update(domain);
    for d in data {
        h.update(d);
    }
    let wide: [u8; 64] = h.finalize().into();
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Hash a compressed key to a group element (for key images).
pub fn hash_to_point(data: &[u8]) -> RistrettoPoint {
    let mut h = Blake2b512::new();
    h.update(b"umbra.hash_to_point");
    h.update(data);
    let wide: [u8; 64] = h.finalize().into();
    RistrettoPoint::from_uniform_bytes(&wide)
}

/// Compute the key image `I = x * Hp(P)` of a one-time key pair.
pub fn key_image(secret: &SecretKey, public: &PublicKey) -> KeyImage {
    let base = hash_to_point(&public.0);
    KeyImage((base * secret.0).compress().to_bytes())
}

/// Sender/receiver shared secret: `r * V == v * R`.
pub fn generate_key_derivation(public: &PublicKey, secret: &SecretKey) -> RctResult<KeyDerivation> {
    Ok(KeyDerivation(public.point()? * secret.0))
}

fn derivation_scalar(derivation: &KeyDerivation, output_index: u64) -> Scalar {
    hash_to_scalar(
        b"umbra.derivation",
        &[
            derivation.0.compress().as_bytes(),
            &output_index.to_le_bytes(),
        ],
    )
}

/// Derive the one-time public key `P = Hs(D ‖ i)·G + S` for output `i`.
pub fn derive_public_key(
    derivation: &KeyDerivation,
    output_index: u64,
    spend_public: &PublicKey,
) -> RctResult<PublicKey> {
    let s = derivation_scalar(derivation, output_index);
    Ok(PublicKey::from_point(
        &(RISTRETTO_BASEPOINT_POINT * s + spend_public.point()?),
    ))
}

/// Derive the one-time secret key `x = Hs(D ‖ i) + s` for output `i`.
pub fn derive_secret_key(
    derivation: &KeyDerivation,
    output_index: u64,
    spend_secret: &SecretKey,
) -> SecretKey {
    SecretKey(derivation_scalar(derivation, output_index) + spend_secret.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_derivation_roundtrip() {
        let mut rng = OsRng;
        let tx_key = KeyPair::generate(&mut rng);
        let view = KeyPair::generate(&mut rng);
        let spend = KeyPair::generate(&mut rng);

        // Sender derives with (V, r); receiver with (R, v). Both must agree.
        let sender = generate_key_derivation(&view.public, &tx_key.secret).unwrap();
        let receiver = generate_key_derivation(&tx_key.public, &view.secret).unwrap();
        assert_eq!(
            sender.0.compress().to_bytes(),
            receiver.0.compress().to_bytes()
        );

        let one_time = derive_public_key(&sender, 0, &spend.public).unwrap();
        let one_time_secret = derive_secret_key(&receiver, 0, &spend.secret);
        let rebuilt = KeyPair::from_secret(one_time_secret.0);
        assert_eq!(one_time, rebuilt.public);
    }

    #[test]
    fn test_key_image_deterministic() {
        let mut rng = OsRng;
        let pair = KeyPair::generate(&mut rng);
        let ki1 = key_image(&pair.secret, &pair.public);
        let ki2 = key_image(&pair.secret, &pair.public);
        assert_eq!(ki1, ki2);

        let other = KeyPair::generate(&mut rng);
        assert_ne!(ki1, key_image(&other.secret, &other.public));
    }

    #[test]
    fn test_invalid_point_rejected() {
        // Not every 32-byte string is a valid Ristretto encoding.
        let bad = PublicKey([0xff; 32]);
        assert!(bad.point().is_err());
    }
}
