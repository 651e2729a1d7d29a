//! Verification-context records returned across the core boundary.

use serde::{Deserialize, Serialize};

/// Outcome bitfield for a submitted block.
///
/// Consensus failures never propagate as errors past the core boundary;
/// callers read this record instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVerificationContext {
    pub added_to_main_chain: bool,
    pub verification_failed: bool,
    pub marked_as_orphaned: bool,
    pub already_exists: bool,
    /// The miner claimed less than the full reward (accepted, annotated).
    pub partial_block_reward: bool,
}

/// Outcome bitfield for a verified transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxVerificationContext {
    pub verification_failed: bool,
    pub double_spend: bool,
    pub low_mixin: bool,
    pub invalid_output: bool,
}
