//! Blockchain checkpoints.
//!
//! A checkpoint is a pre-defined hash for the block at a given height.
//! Some are compiled in per network; more can be loaded at runtime from a
//! JSON document (the DNS transport that feeds the same path is an
//! external collaborator).

use crate::{ConsensusError, ConsensusResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{info, warn};
use umbra_types::Hash;

#[derive(Deserialize)]
struct CheckpointJsonEntry {
    height: u64,
    hash: String,
}

#[derive(Deserialize)]
struct CheckpointJson {
    hashes: Vec<CheckpointJsonEntry>,
}

/// A container for blockchain checkpoints.
#[derive(Debug, Clone, Default)]
pub struct Checkpoints {
    points: BTreeMap<u64, Hash>,
}

impl Checkpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from compiled-in `(height, hex hash)` pairs.
    pub fn from_static(entries: &[(u64, &str)]) -> ConsensusResult<Self> {
        let mut checkpoints = Self::new();
        for (height, hash) in entries {
            checkpoints.add_checkpoint(*height, hash)?;
        }
        Ok(checkpoints)
    }

    /// Add a checkpoint. A duplicate height with a different hash is an
    /// error; an identical repeat is accepted.
    pub fn add_checkpoint(&mut self, height: u64, hash_str: &str) -> ConsensusResult<()> {
        let bytes = hex::decode(hash_str)
            .map_err(|e| ConsensusError::InvalidCheckpoint(format!("bad hex: {}", e)))?;
        let hash = Hash::from_slice(&bytes)
            .ok_or_else(|| ConsensusError::InvalidCheckpoint("hash must be 32 bytes".into()))?;
        match self.points.get(&height) {
            Some(existing) if *existing != hash => Err(ConsensusError::InvalidCheckpoint(
                format!("conflicting checkpoint at height {}", height),
            )),
            _ => {
                self.points.insert(height, hash);
                Ok(())
            }
        }
    }

    /// Whether `height` is at or below the highest checkpoint.
    pub fn is_in_checkpoint_zone(&self, height: u64) -> bool {
        self.points
            .keys()
            .next_back()
            .map(|max| height <= *max)
            .unwrap_or(false)
    }

    /// Check a block hash against the checkpoint at its height, if any.
    /// Returns `(passes, is_a_checkpoint)`.
    pub fn check_block(&self, height: u64, hash: &Hash) -> (bool, bool) {
        match self.points.get(&height) {
            Some(expected) => {
                let ok = expected == hash;
                if !ok {
                    warn!(height, %hash, %expected, "CHECKPOINT VALIDATION FAILED");
                }
                (ok, true)
            }
            None => (true, false),
        }
    }

    /// Whether an alternate block at `block_height` may exist while the
    /// main chain is `chain_height` long: alternates may not fork below
    /// the last checkpoint.
    pub fn is_alternative_block_allowed(&self, chain_height: u64, block_height: u64) -> bool {
        if block_height == 0 {
            return false;
        }
        let last_before_tip = self
            .points
            .range(..chain_height)
            .next_back()
            .map(|(h, _)| *h)
            .unwrap_or(0);
        block_height > last_before_tip
    }

    /// Merge checkpoints from a JSON document
    /// (`{"hashes": [{"height": .., "hash": ".."}]}`).
    pub fn load_from_json(&mut self, json: &str) -> ConsensusResult<()> {
        let parsed: CheckpointJson = serde_json::from_str(json)
            .map_err(|e| ConsensusError::InvalidCheckpoint(format!("bad json: {}", e)))?;
        let count = parsed.hashes.len();
        for entry in parsed.hashes {
            self.add_checkpoint(entry.height, &entry.hash)?;
        }
        info!(count, "Checkpoints loaded from json");
        Ok(())
    }

    /// Whether `other` agrees with this set on all shared heights.
    pub fn check_for_conflicts(&self, other: &Checkpoints) -> bool {
        other
            .points
            .iter()
            .all(|(h, hash)| self.points.get(h).map(|own| own == hash).unwrap_or(true))
    }

    /// All checkpoints, height-ordered.
    pub fn points(&self) -> &BTreeMap<u64, Hash> {
        &self.points
    }
}
