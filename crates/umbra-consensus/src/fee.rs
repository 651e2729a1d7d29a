//! Fee schemes.
//!
//! Three generations, selected by feature tag:
//! (a) dynamic per-kB fee derived from the median block size and the
//!     declining subsidy, with a floor;
//! (b) fixed per-kB fee;
//! (c) per-kB plus per-ring-member fee.

use crate::emission::get_block_reward;
use crate::hardfork::{Feature, HardFork};
use crate::params;
use tracing::debug;
use umbra_types::{Transaction, TxIn};

/// Chain-derived inputs to the fee check.
#[derive(Debug, Clone, Copy)]
pub struct FeeContext {
    /// Half the current cumulative block-size limit.
    pub median_block_size: u64,
    /// Current chain height.
    pub height: u64,
    /// Generated coins sampled at the last emission-interval boundary.
    pub generated_coins_at_interval: u64,
}

/// The dynamic per-kB fee for scheme (a).
pub fn dynamic_per_kb_fee(block_reward: u64, median_block_size: u64) -> u64 {
    let median = median_block_size.max(params::BLOCK_SIZE_GROWTH_FAVORED_ZONE);
    // Keeps the full-block fee from collapsing as the subsidy declines.
    let reward = block_reward.max(params::DYNAMIC_FEE_PER_KB_BASE_BLOCK_REWARD);

    let unscaled = params::DYNAMIC_FEE_PER_KB_BASE_FEE * params::BLOCK_SIZE_GROWTH_FAVORED_ZONE
        / median;
    // 128-bit product, divided back down by the base block reward. The
    // base reward must stay divisible by 10^6 (see its constant).
    let fee = (unscaled as u128 * reward as u128)
        / params::DYNAMIC_FEE_PER_KB_BASE_BLOCK_REWARD as u128;
    fee as u64
}

/// Whether `fee` covers the active scheme's minimum for a transaction of
/// `blob_size` bytes.
pub fn check_fee(
    hardfork: &HardFork,
    height: u64,
    tx: &Transaction,
    blob_size: u64,
    fee: u64,
    ctx: &FeeContext,
) -> bool {
    let needed_fee;

    if hardfork.check_feature(Feature::FeeV2, height) {
        let mut needed = 0u64;
        if let Some(TxIn::ToKey { key_offsets, .. }) = tx.vin.first() {
            needed += key_offsets.len() as u64 * params::FEE_PER_RING_MEMBER;
        }
        needed += blob_size * params::FEE_PER_KB / 1024;
        needed_fee = needed;
    } else if hardfork.check_feature(Feature::FixedFee, height) {
        needed_fee = blob_size * params::FEE_PER_KB / 1024;
    } else {
        let base_reward = match get_block_reward(
            ctx.median_block_size,
            1,
            ctx.generated_coins_at_interval,
            ctx.height,
        ) {
            Ok(reward) => reward,
            Err(_) => return false,
        };
        let fee_per_kb = dynamic_per_kb_fee(base_reward, ctx.median_block_size);
        debug!(fee_per_kb, "Using dynamic fee");

        // Float arithmetic is consensus-visible here: the kB count is
        // computed in single precision and truncated, then rounded to the
        // fee granularity. Changing this to integer math would fork the
        // chain; the unsigned wraparound of the reserved-size subtraction
        // is part of the rule too.
        let kb = blob_size.wrapping_sub(params::COINBASE_BLOB_RESERVED_SIZE) as f32 / 1024.0;
        needed_fee = ((kb * fee_per_kb as f32) as u64) / 100 * 100;
    }

    if fee < needed_fee {
        debug!(fee, needed_fee, "Transaction fee is not enough");
        return false;
    }
    true
}
