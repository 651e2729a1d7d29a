//! Block-level checks: timestamps, coinbase prevalidation, miner reward.

use crate::coinbase::AccountAddress;
use crate::emission::{dev_fund_amount, get_block_reward};
use crate::network::NetworkConfig;
use crate::params;
use crate::{ConsensusError, ConsensusResult};
use tracing::warn;
use umbra_ringct::{derive_public_key, generate_key_derivation, KeyPair};
use umbra_types::{parse_tx_extra, Block, RctType, TxExtraField, TxIn};

/// Median of a list of values (even lengths average the middle pair).
pub fn median(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2
    }
}

/// The future-time-limit check against adjusted time.
pub fn check_block_timestamp(
    block_timestamp: u64,
    adjusted_now: u64,
    future_limit: u64,
) -> ConsensusResult<()> {
    if block_timestamp > adjusted_now + future_limit {
        return Err(ConsensusError::BadTimestamp(format!(
            "timestamp {} is past adjusted time {} + {}",
            block_timestamp, adjusted_now, future_limit
        )));
    }
    Ok(())
}

/// The median and backdate checks against a window of recent timestamps
/// (chain order; the last entry is the top block). Returns the median.
pub fn check_block_timestamp_window(
    timestamps: &[u64],
    block: &Block,
    backdate_check: bool,
    future_limit: u64,
) -> ConsensusResult<u64> {
    let median_ts = median(timestamps);

    if let Some(top_timestamp) = timestamps.last() {
        if backdate_check && block.header.timestamp + future_limit < *top_timestamp {
            warn!(
                id = %block.hash(),
                timestamp = block.header.timestamp,
                top_timestamp,
                "Back-dated block"
            );
            return Err(ConsensusError::BadTimestamp(format!(
                "timestamp {} back-dated against top {}",
                block.header.timestamp, top_timestamp
            )));
        }
    }

    if block.header.timestamp < median_ts {
        warn!(
            id = %block.hash(),
            timestamp = block.header.timestamp,
            median_ts,
            window = timestamps.len(),
            "Timestamp below window median"
        );
        return Err(ConsensusError::BadTimestamp(format!(
            "timestamp {} below median {} of last {} blocks",
            block.header.timestamp,
            median_ts,
            timestamps.len()
        )));
    }

    Ok(median_ts)
}

/// Sanity checks every miner transaction must pass: one coinbase input
/// carrying the block's height, a null signature bundle, the fixed unlock
/// window, and non-overflowing outputs.
pub fn prevalidate_miner_transaction(block: &Block, height: u64) -> ConsensusResult<()> {
    let tx = &block.miner_tx;
    match tx.vin.as_slice() {
        [TxIn::Gen {
            height: claimed_height,
        }] => {
            if *claimed_height != height {
                return Err(ConsensusError::BadCoinbase(format!(
                    "coinbase claims height {}, expected {}",
                    claimed_height, height
                )));
            }
        }
        _ => {
            return Err(ConsensusError::BadCoinbase(
                "coinbase must have exactly one generation input".into(),
            ))
        }
    }
    if tx.rct.rct_type != RctType::Null {
        return Err(ConsensusError::BadCoinbase(
            "coinbase must carry a null signature bundle".into(),
        ));
    }
    let expected_unlock = height + params::MINED_MONEY_UNLOCK_WINDOW;
    if tx.unlock_time != expected_unlock {
        return Err(ConsensusError::BadCoinbase(format!(
            "coinbase unlock time {}, expected {}",
            tx.unlock_time, expected_unlock
        )));
    }
    let mut total: u64 = 0;
    for out in &tx.vout {
        total = total.checked_add(out.amount).ok_or_else(|| {
            ConsensusError::BadCoinbase("coinbase outputs overflow".into())
        })?;
    }
    Ok(())
}

fn reward_window_check(
    median_size: u64,
    cumulative_block_size: u64,
    already_generated_coins: u64,
    height: u64,
) -> ConsensusResult<u64> {
    get_block_reward(
        median_size,
        cumulative_block_size,
        already_generated_coins,
        height,
    )
}

/// Pre-dev-fund reward validation: the coinbase may claim at most
/// subsidy plus fees. Claiming less is accepted and flagged as a partial
/// reward; the shortfall returns to the emission pool.
pub fn validate_miner_transaction_v1(
    block: &Block,
    median_size: u64,
    cumulative_block_size: u64,
    fee: u64,
    already_generated_coins: u64,
    height: u64,
) -> ConsensusResult<(u64, bool)> {
    let money_in_use = block.miner_tx.output_amount();
    let base_reward = reward_window_check(
        median_size,
        cumulative_block_size,
        already_generated_coins,
        height,
    )?;

    if base_reward + fee < money_in_use {
        return Err(ConsensusError::BadReward(format!(
            "coinbase spends {} but block reward is {} ({} + {})",
            money_in_use,
            base_reward + fee,
            base_reward,
            fee
        )));
    }

    let partial = base_reward + fee != money_in_use;
    Ok((money_in_use - fee, partial))
}

/// Dev-fund-era reward validation: outputs are partitioned into dev and
/// miner shares by deriving the dev wallet's one-time keys under the
/// transaction key, and the dev share must equal the per-height schedule
/// exactly.
pub fn validate_miner_transaction_v2(
    config: &NetworkConfig,
    block: &Block,
    height: u64,
    median_size: u64,
    cumulative_block_size: u64,
    fee: u64,
    already_generated_coins: u64,
) -> ConsensusResult<(u64, bool)> {
    let tx = &block.miner_tx;
    let tx_pub = parse_tx_extra(&tx.extra)
        .ok()
        .and_then(|fields| {
            fields.into_iter().find_map(|f| match f {
                TxExtraField::PubKey(pk) => Some(pk),
                _ => None,
            })
        })
        .ok_or_else(|| {
            ConsensusError::BadCoinbase("coinbase tx public key is absent or invalid".into())
        })?;

    let derivation = generate_key_derivation(&tx_pub, &config.dev_view_secret)
        .map_err(|_| ConsensusError::BadCoinbase("coinbase tx public key is invalid".into()))?;

    let mut miner_money: u64 = 0;
    let mut dev_money: u64 = 0;
    for (i, out) in tx.vout.iter().enumerate() {
        if out.amount == 0 {
            return Err(ConsensusError::BadCoinbase(
                "confidential output in a miner tx".into(),
            ));
        }
        let dev_key = derive_public_key(&derivation, i as u64, &config.dev_spend_public)?;
        if out.target == dev_key {
            dev_money += out.amount;
        } else {
            miner_money += out.amount;
        }
    }

    let base_reward = reward_window_check(
        median_size,
        cumulative_block_size,
        already_generated_coins,
        height,
    )?;

    if base_reward + fee < miner_money {
        return Err(ConsensusError::BadReward(format!(
            "coinbase spends {} but block reward is {} ({} + {})",
            miner_money,
            base_reward + fee,
            base_reward,
            fee
        )));
    }

    let dev_money_needed = dev_fund_amount(height);
    if dev_money != dev_money_needed {
        return Err(ConsensusError::BadReward(format!(
            "coinbase generates dev fund {} but {} is needed",
            dev_money, dev_money_needed
        )));
    }

    let partial = base_reward + fee != miner_money;
    Ok((miner_money - fee, partial))
}

/// Convenience for collaborators needing the dev view wallet's address
/// form (e.g. template tests).
pub fn dev_fund_address(config: &NetworkConfig) -> AccountAddress {
    AccountAddress {
        spend_public: config.dev_spend_public,
        view_public: KeyPair::from_secret(config.dev_view_secret.0).public,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coinbase::construct_miner_tx;
    use umbra_types::{BlockHeader, Hash};

    fn block_with_miner_tx(height: u64, dev_fund_active: bool, fee: u64) -> (NetworkConfig, Block) {
        let config = NetworkConfig::testnet();
        let mut rng = rand::rngs::OsRng;
        let address = AccountAddress {
            spend_public: KeyPair::generate(&mut rng).public,
            view_public: KeyPair::generate(&mut rng).public,
        };
        let miner_tx = construct_miner_tx(
            &config,
            height,
            0,
            0,
            0,
            fee,
            &address,
            &[],
            2,
            dev_fund_active,
            None,
        )
        .unwrap();
        let block = Block {
            header: BlockHeader {
                major_version: 1,
                minor_version: 1,
                timestamp: 0,
                prev_id: Hash::ZERO,
                nonce: 0,
            },
            miner_tx,
            tx_hashes: Vec::new(),
        };
        (config, block)
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), 0);
        assert_eq!(median(&[5]), 5);
        assert_eq!(median(&[5, 9]), 7);
        assert_eq!(median(&[9, 1, 5]), 5);
        assert_eq!(median(&[4, 1, 3, 2]), 2);
    }

    #[test]
    fn test_timestamp_window_rules() {
        let (_, mut block) = block_with_miner_tx(3, false, 0);
        let window = vec![100, 110, 120, 130, 140];

        block.header.timestamp = 90;
        assert!(check_block_timestamp_window(&window, &block, false, 500).is_err());

        block.header.timestamp = 125;
        assert_eq!(
            check_block_timestamp_window(&window, &block, false, 500).unwrap(),
            120
        );

        // Backdate rule: more than the limit below the top timestamp.
        let window = vec![100, 110, 10_000];
        block.header.timestamp = 8000;
        assert!(check_block_timestamp_window(&window, &block, true, 500).is_err());
        assert!(check_block_timestamp_window(&window, &block, false, 500).is_ok());
    }

    #[test]
    fn test_future_limit() {
        assert!(check_block_timestamp(1000, 900, 100).is_ok());
        assert!(check_block_timestamp(1001, 900, 100).is_err());
    }

    #[test]
    fn test_prevalidate_miner_tx() {
        let (_, block) = block_with_miner_tx(7, false, 0);
        prevalidate_miner_transaction(&block, 7).unwrap();

        // Height mismatch.
        assert!(prevalidate_miner_transaction(&block, 8).is_err());

        // Wrong unlock time.
        let (_, mut block) = block_with_miner_tx(7, false, 0);
        block.miner_tx.unlock_time += 1;
        assert!(prevalidate_miner_transaction(&block, 7).is_err());
    }

    #[test]
    fn test_validate_v1_reward() {
        let (_, block) = block_with_miner_tx(3, false, 0);
        let (base, partial) =
            validate_miner_transaction_v1(&block, 0, 0, 0, 0, 3).unwrap();
        assert!(!partial);
        assert_eq!(base, get_block_reward(0, 0, 0, 3).unwrap());

        // Claiming more than subsidy + fees fails.
        let (_, mut greedy) = block_with_miner_tx(3, false, 0);
        greedy.miner_tx.vout[0].amount += 1;
        assert!(validate_miner_transaction_v1(&greedy, 0, 0, 0, 0, 3).is_err());

        // Claiming less is a partial reward, not an error.
        let (_, mut modest) = block_with_miner_tx(3, false, 0);
        modest.miner_tx.vout[0].amount -= 1;
        let (_, partial) =
            validate_miner_transaction_v1(&modest, 0, 0, 0, 0, 3).unwrap();
        assert!(partial);
    }

    #[test]
    fn test_validate_v2_dev_fund_split() {
        let height = params::DEV_FUND_START;
        let (config, block) = block_with_miner_tx(height, true, 500);
        let (base, partial) =
            validate_miner_transaction_v2(&config, &block, height, 0, 0, 500, 0).unwrap();
        assert!(!partial);
        assert_eq!(base, get_block_reward(0, 0, 0, height).unwrap());

        // Shorting the dev fund is rejected.
        let (config, mut cheat) = block_with_miner_tx(height, true, 500);
        let dev_amount = cheat.miner_tx.vout[1].amount;
        cheat.miner_tx.vout[1].amount = dev_amount - 1;
        cheat.miner_tx.vout[0].amount += 1;
        assert!(
            validate_miner_transaction_v2(&config, &cheat, height, 0, 0, 500, 0).is_err()
        );

        // Omitting the dev output entirely is rejected too.
        let (config, mut cheat) = block_with_miner_tx(height, true, 500);
        cheat.miner_tx.vout.truncate(1);
        assert!(
            validate_miner_transaction_v2(&config, &cheat, height, 0, 0, 500, 0).is_err()
        );
    }
}
