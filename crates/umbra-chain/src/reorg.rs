//! Alternate-chain handling and reorganization.

use crate::chain::{adjusted_time, Blockchain, ChainInner};
use crate::ChainResult;
use tracing::{debug, error, info, warn};
use umbra_consensus::{
    check_block_timestamp_window, check_hash, difficulty_blocks_count, get_block_longhash,
    next_difficulty, params, prevalidate_miner_transaction, Feature,
};
use umbra_types::{Block, BlockExtendedInfo, BlockVerificationContext, Difficulty, Hash};

/// ln(p) of the Poisson distribution.
///
/// Using logarithms avoids dealing with very large k! and very small
/// (p < 10^-44) numbers.
/// `lam` - how many blocks, on average, you would expect in the interval.
/// `k`   - how many blocks were actually seen; must not be zero.
pub(crate) fn calc_poisson_ln(lam: f64, k: u64) -> f64 {
    let mut logx = -lam + k as f64 * lam.ln();
    let mut i = k;
    while i > 0 {
        logx -= (i as f64).ln();
        i -= 1;
    }
    logx
}

impl Blockchain {
    /// Handle a block whose parent is not the current tip: queue it on an
    /// alternate chain, trigger a reorg if that chain overtakes the main
    /// chain, or record it as an orphan.
    pub(crate) fn handle_alternative_block(
        &self,
        inner: &mut ChainInner,
        block: &Block,
        id: &Hash,
        bvc: &mut BlockVerificationContext,
    ) -> ChainResult<bool> {
        inner.difficulty_cache.invalidate();

        let block_height = block.height();
        if block_height == 0 {
            warn!(%id, "Alternative block claims height 0");
            bvc.verification_failed = true;
            return Ok(false);
        }

        let chain_height = self.store.height()?;
        {
            let checkpoints = self.checkpoints.lock();
            if !checkpoints.is_alternative_block_allowed(chain_height, block_height) {
                warn!(
                    %id,
                    block_height,
                    chain_height,
                    "Block can't be accepted for an alternative chain below a checkpoint"
                );
                bvc.verification_failed = true;
                return Ok(false);
            }
        }

        if !inner.hardfork.check_for_height(block, block_height) {
            debug!(%id, block_height, "Alternative block has old version for its height");
            bvc.verification_failed = true;
            return Ok(false);
        }

        let parent_in_alt = inner.alternative_chains.contains_key(&block.header.prev_id);
        let parent_in_main = self.store.block_exists(&block.header.prev_id)?;
        if !parent_in_alt && !parent_in_main {
            // Orphan: parent unknown anywhere; no state change.
            bvc.marked_as_orphaned = true;
            warn!(
                %id,
                block_height,
                parent = %block.header.prev_id,
                "Block recognized as orphaned and rejected"
            );
            return Ok(true);
        }

        // Build the alternative subchain, front -> main-chain attachment,
        // back -> this block's parent, collecting timestamps on the way.
        let mut alt_chain: Vec<Hash> = Vec::new();
        let mut timestamps: Vec<u64> = Vec::new();
        let mut cursor = block.header.prev_id;
        while let Some(entry) = inner.alternative_chains.get(&cursor) {
            alt_chain.push(cursor);
            timestamps.push(entry.block.header.timestamp);
            cursor = entry.block.header.prev_id;
        }
        alt_chain.reverse();

        if let Some(front) = alt_chain.first() {
            let front_entry = &inner.alternative_chains[front];
            if chain_height <= front_entry.height {
                error!("Main blockchain wrong height against alternative chain");
                return Ok(false);
            }
            if !self.store.block_exists(&front_entry.block.header.prev_id)? {
                error!("Alternate chain does not appear to connect to the main chain");
                return Ok(false);
            }
            let connect = self.store.block_hash_at(front_entry.height - 1)?;
            if connect != front_entry.block.header.prev_id {
                error!("Alternative chain has wrong connection to the main chain");
                return Ok(false);
            }
            self.complete_timestamps_vector(inner, front_entry.height - 1, &mut timestamps)?;
        } else {
            let parent_height = self
                .store
                .block_height(&block.header.prev_id)?
                .ok_or_else(|| {
                    crate::ChainError::Fatal("broken condition: parent_in_main".into())
                })?;
            self.complete_timestamps_vector(inner, parent_height, &mut timestamps)?;
        }

        // Median/backdate check against the spliced window.
        timestamps.sort_unstable();
        let backdate = inner
            .hardfork
            .check_feature(Feature::CheckBlockBackdate, block_height);
        let future_limit = self.future_time_limit(inner, block_height);
        if check_block_timestamp_window(&timestamps, block, backdate, future_limit).is_err() {
            warn!(
                %id,
                timestamp = block.header.timestamp,
                "Alternative block has invalid timestamp"
            );
            bvc.verification_failed = true;
            return Ok(false);
        }

        let parent_main_height = self.store.block_height(&block.header.prev_id)?;
        let prev_height = match alt_chain.last() {
            Some(tip) => inner.alternative_chains[tip].height,
            None => parent_main_height.ok_or_else(|| {
                crate::ChainError::Fatal("alt parent vanished from the main chain".into())
            })?,
        };
        let height = prev_height + 1;

        let block_reward = block.miner_tx.output_amount();
        let prev_generated_coins = match alt_chain.last() {
            Some(tip) => inner.alternative_chains[tip].already_generated_coins,
            None => self.store.already_generated_coins(prev_height)?,
        };
        let already_generated_coins =
            if block_reward < params::MONEY_SUPPLY - prev_generated_coins {
                prev_generated_coins + block_reward
            } else {
                params::MONEY_SUPPLY
            };

        let is_a_checkpoint;
        {
            let checkpoints = self.checkpoints.lock();
            let (ok, checkpointed) = checkpoints.check_block(height, id);
            if !ok {
                error!("CHECKPOINT VALIDATION FAILED");
                bvc.verification_failed = true;
                return Ok(false);
            }
            is_a_checkpoint = checkpointed;
        }

        // Check the block's hash against the difficulty target for its
        // alt chain.
        let current_diff = self.get_next_difficulty_for_alternative_chain(inner, &alt_chain, height)?;
        let proof_of_work = match inner.longhash_table.get(id) {
            Some(pow) => *pow,
            None => get_block_longhash(block),
        };
        if !check_hash(&proof_of_work, current_diff) {
            warn!(
                %id,
                %proof_of_work,
                difficulty = current_diff,
                "Alternative block does not have enough proof of work"
            );
            bvc.verification_failed = true;
            return Ok(false);
        }

        if let Err(e) = prevalidate_miner_transaction(block, height) {
            warn!(%id, error = %e, "Alternative block has incorrect miner transaction");
            bvc.verification_failed = true;
            return Ok(false);
        }

        let main_chain_cumulative_difficulty =
            self.store.cumulative_difficulty(chain_height - 1)?;
        let prev_cumulative_difficulty = match alt_chain.last() {
            Some(tip) => inner.alternative_chains[tip].cumulative_difficulty,
            None => self.store.cumulative_difficulty(prev_height)?,
        };
        let cumulative_difficulty = prev_cumulative_difficulty + current_diff;

        let bei = BlockExtendedInfo {
            block: block.clone(),
            height,
            cumulative_difficulty,
            already_generated_coins,
            block_size: 0,
        };
        if inner.alternative_chains.insert(*id, bei).is_some() {
            error!(%id, "Insertion of new alternative block returned as it already exists");
            return Ok(false);
        }
        let mut alt_chain = alt_chain;
        alt_chain.push(*id);

        if is_a_checkpoint {
            // The alternate branch carries a checkpoint: forced reorg.
            info!(
                split_height = inner.alternative_chains[&alt_chain[0]].height,
                chain_height = chain_height - 1,
                checkpoint_height = height,
                "###### REORGANIZE: checkpoint found in alternative chain"
            );
            let r = self.switch_to_alternative_blockchain(inner, &alt_chain, true)?;
            if r {
                bvc.added_to_main_chain = true;
            } else {
                bvc.verification_failed = true;
            }
            Ok(r)
        } else if main_chain_cumulative_difficulty < cumulative_difficulty {
            info!(
                split_height = inner.alternative_chains[&alt_chain[0]].height,
                chain_height = chain_height - 1,
                main_difficulty = main_chain_cumulative_difficulty,
                alt_difficulty = cumulative_difficulty,
                alt_size = alt_chain.len(),
                "###### REORGANIZE: alternative chain has more cumulative difficulty"
            );
            let r = self.switch_to_alternative_blockchain(inner, &alt_chain, false)?;
            if r {
                bvc.added_to_main_chain = true;
            } else {
                bvc.verification_failed = true;
            }
            Ok(r)
        } else {
            info!(
                height,
                %id,
                %proof_of_work,
                difficulty = current_diff,
                "----- BLOCK ADDED AS ALTERNATIVE"
            );
            Ok(true)
        }
    }

    /// Difficulty target for the next block of an alternate chain: the alt
    /// chain's own tail spliced onto enough main-chain history to fill the
    /// active window.
    pub(crate) fn get_next_difficulty_for_alternative_chain(
        &self,
        inner: &ChainInner,
        alt_chain: &[Hash],
        height: u64,
    ) -> ChainResult<Difficulty> {
        let block_count = difficulty_blocks_count(&inner.hardfork, height);
        let mut timestamps: Vec<u64> = Vec::with_capacity(block_count);
        let mut cumulative_difficulties: Vec<Difficulty> = Vec::with_capacity(block_count);

        if alt_chain.len() < block_count {
            // Not enough alt blocks: pull the remainder from the main
            // chain below the attachment point.
            let main_chain_stop_offset = match alt_chain.first() {
                Some(front) => inner.alternative_chains[front].height,
                None => height,
            };
            let main_chain_count =
                (block_count - alt_chain.len().min(block_count)).min(main_chain_stop_offset as usize);
            let mut main_chain_start_offset =
                main_chain_stop_offset - main_chain_count as u64;
            if main_chain_start_offset == 0 {
                main_chain_start_offset += 1; // skip genesis
            }
            for h in main_chain_start_offset..main_chain_stop_offset {
                timestamps.push(self.store.block_timestamp(h)?);
                cumulative_difficulties.push(self.store.cumulative_difficulty(h)?);
            }
            for id in alt_chain {
                let entry = &inner.alternative_chains[id];
                timestamps.push(entry.block.header.timestamp);
                cumulative_difficulties.push(entry.cumulative_difficulty);
            }
        } else {
            for id in &alt_chain[alt_chain.len() - block_count..] {
                let entry = &inner.alternative_chains[id];
                timestamps.push(entry.block.header.timestamp);
                cumulative_difficulties.push(entry.cumulative_difficulty);
            }
        }

        Ok(next_difficulty(
            &inner.hardfork,
            height,
            &timestamps,
            &cumulative_difficulties,
        ))
    }

    /// Timestamp plausibility gate ahead of a deep reorg: an offline-
    /// constructed equal-difficulty chain with stretched timestamps makes
    /// the observed block counts wildly improbable under a Poisson model.
    fn poisson_reorg_check(&self, inner: &ChainInner, alt_chain: &[Hash]) -> ChainResult<bool> {
        if alt_chain.len() < params::POISSON_CHECK_TRIGGER {
            return Ok(true);
        }
        let alt_chain_size = alt_chain.len() as u64;
        let tip = &inner.alternative_chains[alt_chain.last().unwrap()];
        let front = &inner.alternative_chains[&alt_chain[0]];
        let mut high_timestamp = tip.block.header.timestamp;
        let mut low_block = front.block.header.prev_id;

        if !inner
            .hardfork
            .check_feature(Feature::DifficultyV4, self.store.height()?)
        {
            // Make sure high_timestamp really is the highest.
            for id in alt_chain {
                let ts = inner.alternative_chains[id].block.header.timestamp;
                if high_timestamp < ts {
                    high_timestamp = ts;
                }
            }
        }

        // This would fail later anyway.
        let future_limit = params::BLOCK_FUTURE_TIME_LIMIT_V3;
        if high_timestamp > adjusted_time() + future_limit {
            error!(
                high_timestamp,
                limit = adjusted_time() + future_limit,
                "Attempting to move to an alternate chain, but it failed the FTL check"
            );
            return Ok(false);
        }

        info!(alt_chain_size, "Poisson check triggered by reorg size");

        let mut failed_checks = 0u64;
        let mut i = 1u64;
        while i <= params::POISSON_CHECK_DEPTH as u64 {
            // Reached the genesis block.
            if low_block.is_zero() {
                break;
            }
            let header = self.store.block_by_hash(&low_block)?;
            let low_timestamp = header.header.timestamp;
            low_block = header.header.prev_id;

            if low_timestamp >= high_timestamp {
                info!(depth = i, "Skipping check due to tampered timestamp on main chain");
                failed_checks += 1;
                i += 1;
                continue;
            }

            let lam = (high_timestamp - low_timestamp) as f64 / params::DIFFICULTY_TARGET as f64;
            if calc_poisson_ln(lam, alt_chain_size + i) < params::POISSON_LOG_P_REJECT {
                info!(
                    depth = i,
                    delta_t = high_timestamp - low_timestamp,
                    size = alt_chain_size + i,
                    "Poisson check failed at depth"
                );
                failed_checks += 1;
            }
            i += 1;
        }

        let checks = i - 1;
        info!(failed_checks, checks, "Poisson check result");
        if failed_checks > checks / 2 {
            error!(
                failed_checks,
                checks,
                alt_chain_size,
                "Attempting to move to an alternate chain, but it failed the Poisson check"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Switch the main chain to `alt_chain` (ids in order, attachment
    /// point first). On failure the previous main chain is restored and
    /// the offending alt blocks are marked invalid.
    pub(crate) fn switch_to_alternative_blockchain(
        &self,
        inner: &mut ChainInner,
        alt_chain: &[Hash],
        discard_disconnected_chain: bool,
    ) -> ChainResult<bool> {
        inner.difficulty_cache.invalidate();

        let Some(front) = alt_chain.first() else {
            error!("switch_to_alternative_blockchain: empty chain passed");
            return Ok(false);
        };
        let front_prev = inner.alternative_chains[front].block.header.prev_id;
        if !self.store.block_exists(&front_prev)? {
            error!("Attempting to move to an alternate chain, but it doesn't connect to the main chain");
            return Ok(false);
        }

        if !self.poisson_reorg_check(inner, alt_chain)? {
            return Ok(false);
        }

        // Pop main-chain blocks until the tip is the alt chain's parent.
        let mut disconnected_chain: Vec<Block> = Vec::new();
        while self.store.top_block_hash()?.unwrap_or(Hash::ZERO) != front_prev {
            let block = self.pop_block_locked(inner)?;
            disconnected_chain.insert(0, block);
        }
        let split_height = self.store.height()?;

        // Connect the new alternative chain.
        for (index, id) in alt_chain.iter().enumerate() {
            let entry = inner.alternative_chains[id].clone();
            let mut bvc = BlockVerificationContext::default();
            let ok =
                self.handle_block_to_main_chain(inner, &entry.block, id, &mut bvc)?;
            if !ok || !bvc.added_to_main_chain {
                warn!("Failed to switch to alternative blockchain");
                self.rollback_blockchain_switching(inner, disconnected_chain, split_height)?;

                // Keep the offender and its descendants around as invalid
                // so identical repeats are dismissed without re-verifying.
                self.add_bei_as_invalid(inner, entry, id);
                warn!(%id, "The block was inserted as invalid while connecting a new alternative chain");
                inner.alternative_chains.remove(id);
                for later in &alt_chain[index + 1..] {
                    if let Some(descendant) = inner.alternative_chains.remove(later) {
                        self.add_bei_as_invalid(inner, descendant, later);
                    }
                }
                return Ok(false);
            }
        }

        // If asked to keep the disconnected blocks, queue them as
        // alternates in turn.
        if !discard_disconnected_chain {
            for old_block in disconnected_chain {
                let old_id = old_block.hash();
                let mut bvc = BlockVerificationContext::default();
                let r = self.handle_alternative_block(inner, &old_block, &old_id, &mut bvc)?;
                if !r {
                    warn!("Failed to push ex-main chain blocks to alternative chain");
                    // Not bad enough to fail the whole switch.
                }
            }
        }

        for id in alt_chain {
            inner.alternative_chains.remove(id);
        }

        inner
            .hardfork
            .reorganize_from_chain_height(&self.store, split_height)?;

        info!(
            split_height,
            new_height = self.store.height()?,
            "REORGANIZE SUCCESS!"
        );
        Ok(true)
    }

    /// Restore a saved main-chain tail after a failed switch: pop back to
    /// `rollback_height`, then re-apply the saved blocks. A failed
    /// re-apply means the node state is beyond repair.
    pub(crate) fn rollback_blockchain_switching(
        &self,
        inner: &mut ChainInner,
        original_chain: Vec<Block>,
        rollback_height: u64,
    ) -> ChainResult<bool> {
        // Fail-safe: rollback height above the chain is a no-op.
        if rollback_height > self.store.height()? {
            return Ok(true);
        }

        inner.difficulty_cache.invalidate();
        while self.store.height()? != rollback_height {
            self.pop_block_locked(inner)?;
        }

        inner
            .hardfork
            .reorganize_from_chain_height(&self.store, rollback_height)?;

        let restored = !original_chain.is_empty();
        for block in original_chain {
            let id = block.hash();
            let mut bvc = BlockVerificationContext::default();
            let ok = self.handle_block_to_main_chain(inner, &block, &id, &mut bvc)?;
            if !ok || !bvc.added_to_main_chain {
                // Re-applying our own previously valid chain cannot fail;
                // continuing would silently diverge from the network.
                panic!("PANIC! failed to add (again) block while chain switching during the rollback!");
            }
        }

        inner
            .hardfork
            .reorganize_from_chain_height(&self.store, rollback_height)?;

        info!(rollback_height, "Rollback was successful");
        if restored {
            info!("Restoration to previous blockchain successful as well");
        }
        Ok(true)
    }

    /// All current alternate tips with their chain lengths.
    pub fn get_alternative_chains(&self) -> Vec<(BlockExtendedInfo, u64)> {
        let inner = self.inner.lock();
        let mut chains = Vec::new();
        for (top, entry) in &inner.alternative_chains {
            let is_tip = !inner
                .alternative_chains
                .values()
                .any(|e| e.block.header.prev_id == *top);
            if is_tip {
                let mut length = 1u64;
                let mut cursor = entry.block.header.prev_id;
                while let Some(prev) = inner.alternative_chains.get(&cursor) {
                    cursor = prev.block.header.prev_id;
                    length += 1;
                }
                chains.push((entry.clone(), length));
            }
        }
        chains
    }

    /// All alternate blocks.
    pub fn get_alternative_blocks(&self) -> Vec<Block> {
        self.inner
            .lock()
            .alternative_chains
            .values()
            .map(|e| e.block.clone())
            .collect()
    }

    pub fn get_alternative_blocks_count(&self) -> usize {
        self.inner.lock().alternative_chains.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poisson_ln_matches_direct_formula() {
        // ln P(k; λ) = -λ + k·ln λ - ln k!
        let lam = 12.0f64;
        let k = 8u64;
        let direct = -lam + k as f64 * lam.ln()
            - (1..=k).map(|i| (i as f64).ln()).sum::<f64>();
        assert!((calc_poisson_ln(lam, k) - direct).abs() < 1e-9);
    }

    #[test]
    fn test_poisson_ln_rejects_stretched_intervals() {
        // Seeing ~13 blocks over an interval that should hold 240 of them
        // is far below the rejection threshold.
        assert!(calc_poisson_ln(240.0, 13) < params::POISSON_LOG_P_REJECT);
        // On-target intervals are fine.
        assert!(calc_poisson_ln(13.0, 13) > params::POISSON_LOG_P_REJECT);
    }
}
