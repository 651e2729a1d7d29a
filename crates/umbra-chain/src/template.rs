//! Block template construction for miners.

use crate::chain::{adjusted_time, Blockchain};
use crate::{ChainError, ChainResult};
use tracing::{debug, warn};
use umbra_consensus::{
    check_block_timestamp_window, construct_miner_tx, AccountAddress, Feature,
};
use umbra_types::{Block, BlockHeader, Difficulty};

/// How many times the coinbase is refitted to land on the exact size.
const TEMPLATE_REFINE_TRIES: usize = 10;

/// A block template handed to a miner.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub block: Block,
    pub difficulty: Difficulty,
    pub height: u64,
    pub expected_reward: u64,
}

impl Blockchain {
    /// Build a block for a miner to hash: current tip, pooled transactions
    /// under the size median, and a coinbase fitted so the serialized
    /// block lands on the predicted size.
    ///
    /// Two-phase construction: the exact block size isn't known until the
    /// coinbase is built, but the reward (and thus the coinbase) depends
    /// on the size, so the coinbase is rebuilt against the running size
    /// estimate until it converges.
    pub fn create_block_template(
        &self,
        miner_address: &AccountAddress,
        extra_nonce: &[u8],
    ) -> ChainResult<BlockTemplate> {
        let mut inner = self.inner.lock();

        let height = self.store.height()?;
        let major_version = inner.hardfork.current_version(height);
        let minor_version = inner.hardfork.ideal_version();
        let prev_id = self.store.top_block_hash()?.unwrap_or(umbra_types::Hash::ZERO);

        let mut timestamp = adjusted_time();
        // Keep the template's timestamp above the window median.
        let window = self.timestamp_check_window(&inner, height);
        if height >= window as u64 {
            let mut timestamps = Vec::with_capacity(window);
            for h in height - window as u64..height {
                timestamps.push(self.store.block_timestamp(h)?);
            }
            let probe = Block {
                header: BlockHeader {
                    major_version,
                    minor_version,
                    timestamp,
                    prev_id,
                    nonce: 0,
                },
                miner_tx: self.probe_coinbase(height, miner_address, extra_nonce, &inner)?,
                tx_hashes: Vec::new(),
            };
            if let Err(_e) =
                check_block_timestamp_window(&timestamps, &probe, false, u64::MAX)
            {
                timestamp = umbra_consensus::median(&timestamps);
            }
        }

        let difficulty = self.get_difficulty_for_next_block(&mut inner)?;
        if difficulty == 0 {
            return Err(ChainError::Fatal("difficulty overhead".into()));
        }

        let median_size = inner.current_block_cumul_sz_limit / 2;
        let already_generated_coins = if height > 0 {
            self.store.already_generated_coins(height - 1)?
        } else {
            0
        };

        let (tx_hashes, txs_size, fee) = self.pool.fill_block_template(median_size);
        let dev_fund_active = inner.hardfork.check_feature(Feature::DevFund, height);
        let tx_version = if inner.hardfork.check_feature(Feature::NeedV3Txes, height) {
            3
        } else {
            2
        };

        // First chance: coinbase built against the bare tx payload size.
        let mut miner_tx = construct_miner_tx(
            &self.config.network,
            height,
            median_size,
            already_generated_coins,
            txs_size,
            fee,
            miner_address,
            extra_nonce,
            tx_version,
            dev_fund_active,
            None,
        )?;
        let mut cumulative_size = txs_size + miner_tx.blob_size() as u64;

        let mut nonce_pad = extra_nonce.to_vec();
        for try_count in 0..TEMPLATE_REFINE_TRIES {
            miner_tx = construct_miner_tx(
                &self.config.network,
                height,
                median_size,
                already_generated_coins,
                cumulative_size,
                fee,
                miner_address,
                &nonce_pad,
                tx_version,
                dev_fund_active,
                None,
            )?;
            let coinbase_size = miner_tx.blob_size() as u64;

            if coinbase_size > cumulative_size - txs_size {
                // The coinbase outgrew its reservation; widen and retry.
                cumulative_size = txs_size + coinbase_size;
                continue;
            }
            if coinbase_size < cumulative_size - txs_size {
                let delta = (cumulative_size - txs_size - coinbase_size) as usize;
                // Growing the nonce grows the blob byte-for-byte; a nonce
                // field added from scratch costs its tag and length too.
                let overhead = if nonce_pad.is_empty() { 5 } else { 0 };
                if delta >= overhead {
                    nonce_pad.extend(std::iter::repeat(0u8).take(delta - overhead));
                    debug!(try_count, delta, "Growing coinbase nonce for exact size");
                    continue;
                }
                // Cannot shrink below the field overhead; restart with the
                // larger reservation.
                cumulative_size = txs_size + coinbase_size;
                continue;
            }

            let expected_reward = miner_tx.output_amount();
            let block = Block {
                header: BlockHeader {
                    major_version,
                    minor_version,
                    timestamp,
                    prev_id,
                    nonce: 0,
                },
                miner_tx,
                tx_hashes: tx_hashes.clone(),
            };
            debug_assert_eq!(
                txs_size + block.miner_tx.blob_size() as u64,
                cumulative_size
            );
            return Ok(BlockTemplate {
                block,
                difficulty,
                height,
                expected_reward,
            });
        }

        warn!(tries = TEMPLATE_REFINE_TRIES, "Failed to create block template");
        Err(ChainError::Fatal(
            "failed to fit coinbase into block template".into(),
        ))
    }

    /// A throwaway coinbase used only to probe serialized sizes.
    fn probe_coinbase(
        &self,
        height: u64,
        miner_address: &AccountAddress,
        extra_nonce: &[u8],
        inner: &crate::chain::ChainInner,
    ) -> ChainResult<umbra_types::Transaction> {
        let tx_version = if inner.hardfork.check_feature(Feature::NeedV3Txes, height) {
            3
        } else {
            2
        };
        Ok(construct_miner_tx(
            &self.config.network,
            height,
            0,
            0,
            0,
            0,
            miner_address,
            extra_nonce,
            tx_version,
            false,
            None,
        )?)
    }
}
