//! Coin emission: block subsidy and the dev-fund schedule.

use crate::params;
use crate::{ConsensusError, ConsensusResult};

/// Base subsidy for a block, given the reward-window median size, the
/// block's own cumulative size, and the coins generated so far.
///
/// The subsidy declines geometrically with generated coins. Blocks larger
/// than the (floored) median pay a quadratic penalty; blocks past twice
/// the median are not allowed at all.
pub fn get_block_reward(
    median_size: u64,
    current_block_size: u64,
    already_generated_coins: u64,
    _height: u64,
) -> ConsensusResult<u64> {
    let median = median_size.max(params::BLOCK_SIZE_GROWTH_FAVORED_ZONE);

    let remaining = params::MONEY_SUPPLY.saturating_sub(already_generated_coins);
    let base_reward = remaining >> params::EMISSION_SPEED_FACTOR;

    if current_block_size <= median {
        return Ok(base_reward);
    }
    if current_block_size > median * 2 {
        return Err(ConsensusError::BlockTooLarge {
            size: current_block_size,
            limit: median * 2,
        });
    }

    // reward * (1 - ((size - median) / median)^2), in integer arithmetic.
    let excess = (current_block_size - median) as u128;
    let median = median as u128;
    let penalty = (base_reward as u128 * excess * excess) / (median * median);
    Ok(base_reward - penalty as u64)
}

/// The exact dev-fund amount a coinbase at `height` must pay while the
/// dev-fund rules are active.
pub fn dev_fund_amount(height: u64) -> u64 {
    if (params::DEV_FUND_START..params::DEV_FUND_END).contains(&height) {
        params::DEV_FUND_PER_BLOCK
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_reward_under_median() {
        let reward = get_block_reward(0, 1000, 0, 0).unwrap();
        assert_eq!(reward, params::MONEY_SUPPLY >> params::EMISSION_SPEED_FACTOR);
    }

    #[test]
    fn test_reward_declines_with_emission() {
        let early = get_block_reward(0, 1000, 0, 0).unwrap();
        let late = get_block_reward(0, 1000, params::MONEY_SUPPLY / 2, 500_000).unwrap();
        assert!(late < early);
        // Fully emitted: nothing left.
        assert_eq!(get_block_reward(0, 1000, params::MONEY_SUPPLY, 0).unwrap(), 0);
    }

    #[test]
    fn test_size_penalty() {
        let zone = params::BLOCK_SIZE_GROWTH_FAVORED_ZONE;
        let full = get_block_reward(0, zone, 0, 0).unwrap();
        let penalized = get_block_reward(0, zone + zone / 2, 0, 0).unwrap();
        assert!(penalized < full);
        // 50% over the median costs a quarter of the reward.
        assert_eq!(penalized, full - full / 4);

        // Double the median is the hard cap.
        assert_eq!(get_block_reward(0, zone * 2, 0, 0).unwrap(), 0);
        assert!(get_block_reward(0, zone * 2 + 1, 0, 0).is_err());
    }

    #[test]
    fn test_dev_fund_window() {
        assert_eq!(dev_fund_amount(params::DEV_FUND_START - 1), 0);
        assert_eq!(
            dev_fund_amount(params::DEV_FUND_START),
            params::DEV_FUND_PER_BLOCK
        );
        assert_eq!(
            dev_fund_amount(params::DEV_FUND_END - 1),
            params::DEV_FUND_PER_BLOCK
        );
        assert_eq!(dev_fund_amount(params::DEV_FUND_END), 0);
    }
}
