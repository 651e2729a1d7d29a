//! Proof-of-work plumbing.
//!
//! The slow-hash primitive itself is a collaborator behind [`pow_hash`];
//! this module owns the difficulty product test and the compiled-in
//! hash-of-hashes fast-sync table.

use crate::params::HASH_OF_HASHES_STEP;
use crate::{ConsensusError, ConsensusResult};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use num_bigint::BigUint;
use num_traits::Zero;
use sha2::Sha256;
use umbra_types::{fast_hash, Block, Difficulty, Hash};

type Blake2b256 = Blake2b<U32>;

/// The proof-of-work hash of a hashing blob.
pub fn pow_hash(blob: &[u8]) -> Hash {
    let mut hasher = Blake2b256::new();
    hasher.update(b"umbra.pow.v1");
    hasher.update(blob);
    let out = hasher.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    Hash(arr)
}

/// The proof-of-work hash of a block.
pub fn get_block_longhash(block: &Block) -> Hash {
    pow_hash(&block.hashing_blob())
}

/// The target test: `hash · difficulty ≤ 2^256 - 1`, i.e. the 512-bit
/// product must not overflow 256 bits. The hash is interpreted as a
/// little-endian integer.
pub fn check_hash(hash: &Hash, difficulty: Difficulty) -> bool {
    if difficulty == 0 {
        return false;
    }
    let product = BigUint::from_bytes_le(&hash.0) * BigUint::from(difficulty);
    (product >> 256u32).is_zero()
}

/// Fold one step's worth of consecutive block hashes into a single
/// hash-of-hashes entry.
pub fn hash_of_hashes_fold(hashes: &[Hash]) -> Hash {
    let mut buf = Vec::with_capacity(hashes.len() * 32);
    for h in hashes {
        buf.extend_from_slice(&h.0);
    }
    fast_hash(&buf)
}

/// Parse a compiled-in hash-of-hashes blob:
/// `[nblocks: u32 LE][hash; 32] × nblocks`, digest-checked with SHA-256
/// against `expected_digest` before any entry is trusted.
pub fn parse_hash_of_hashes_blob(
    blob: &[u8],
    expected_digest: &[u8; 32],
) -> ConsensusResult<Vec<Hash>> {
    let digest = Sha256::digest(blob);
    if digest.as_slice() != expected_digest {
        return Err(ConsensusError::InvalidHashData(
            "blob digest does not match embedded digest".into(),
        ));
    }
    if blob.len() < 4 {
        return Err(ConsensusError::InvalidHashData("blob too short".into()));
    }
    let nblocks = u32::from_le_bytes(blob[..4].try_into().unwrap()) as usize;
    let needed = 4 + nblocks * 32;
    if blob.len() < needed {
        return Err(ConsensusError::InvalidHashData(format!(
            "blob holds {} bytes, {} entries need {}",
            blob.len(),
            nblocks,
            needed
        )));
    }
    let mut entries = Vec::with_capacity(nblocks);
    for i in 0..nblocks {
        let start = 4 + i * 32;
        entries.push(Hash::from_slice(&blob[start..start + 32]).unwrap());
    }
    Ok(entries)
}

/// Number of block hashes one hash-of-hashes entry covers.
pub fn hash_of_hashes_step() -> usize {
    HASH_OF_HASHES_STEP
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_hash_boundaries() {
        // Difficulty one accepts anything.
        assert!(check_hash(&Hash([0xff; 32]), 1));
        // The zero hash passes any difficulty.
        assert!(check_hash(&Hash::ZERO, u128::MAX));
        // A maximal hash fails difficulty two.
        assert!(!check_hash(&Hash([0xff; 32]), 2));
        // Difficulty zero is never valid.
        assert!(!check_hash(&Hash::ZERO, 0));
    }

    #[test]
    fn test_check_hash_monotone_in_difficulty() {
        let hash = pow_hash(b"some block");
        let mut last = true;
        let mut flips = 0;
        for exp in 0..128 {
            let ok = check_hash(&hash, 1u128 << exp);
            if ok != last {
                flips += 1;
                last = ok;
            }
        }
        // Acceptance flips from true to false exactly once.
        assert!(flips <= 1);
    }

    #[test]
    fn test_hash_of_hashes_blob_roundtrip() {
        let entries = vec![fast_hash(b"a"), fast_hash(b"b")];
        let mut blob = (entries.len() as u32).to_le_bytes().to_vec();
        for e in &entries {
            blob.extend_from_slice(&e.0);
        }
        let digest: [u8; 32] = Sha256::digest(&blob).into();
        assert_eq!(parse_hash_of_hashes_blob(&blob, &digest).unwrap(), entries);

        // A flipped digest byte rejects the whole blob.
        let mut bad = digest;
        bad[0] ^= 1;
        assert!(parse_hash_of_hashes_blob(&blob, &bad).is_err());
    }

    #[test]
    fn test_fold_is_order_sensitive() {
        let a = fast_hash(b"a");
        let b = fast_hash(b"b");
        assert_ne!(hash_of_hashes_fold(&[a, b]), hash_of_hashes_fold(&[b, a]));
    }
}
