//! The chain-state coordinator.
//!
//! `Blockchain` owns the main-chain tip, the alternate and invalid block
//! indexes, the sliding size/difficulty windows, and the prepare caches.
//! Consensus decisions are serialized behind one chain lock; the inner
//! state is only reachable through it.

use crate::{ChainError, ChainResult};
use parking_lot::lock_api::RawMutex as _;
use parking_lot::{Mutex, RawMutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};
use umbra_consensus::{
    check_block_timestamp, check_block_timestamp_window, check_hash, check_tx_outputs,
    difficulty_blocks_count, generate_genesis_block, get_block_longhash, median, next_difficulty,
    params, prevalidate_miner_transaction, validate_miner_transaction_v1,
    validate_miner_transaction_v2, Checkpoints, DifficultyCache, Feature, HardFork, NetworkConfig,
    ScanTable, TxVerifier,
};
use umbra_mempool::TxPool;
use umbra_storage::{ChainStore, StorageError};
use umbra_types::{
    Block, BlockExtendedInfo, BlockVerificationContext, Difficulty, Hash, Transaction,
    TxVerificationContext,
};

/// Flush cadence and synchronicity of store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SyncMode {
    Async,
    Sync,
    NoSync,
    Default,
}

/// Node-operator configuration for the chain core.
#[derive(Clone)]
pub struct ChainConfig {
    pub network: NetworkConfig,
    pub sync_mode: SyncMode,
    /// Flush every N accepted blocks when not `NoSync`.
    pub blocks_per_sync: u64,
    /// Upper bound for prepare-pipeline workers.
    pub max_prepare_threads: usize,
    /// Permit the compiled-in hash table to skip PoW on prefix blocks.
    pub fast_sync: bool,
    pub enforce_dns_checkpoints: bool,
    pub offline: bool,
}

impl ChainConfig {
    pub fn new(network: NetworkConfig) -> Self {
        Self {
            network,
            sync_mode: SyncMode::Default,
            blocks_per_sync: 1,
            max_prepare_threads: 4,
            fast_sync: true,
            enforce_dns_checkpoints: false,
            offline: false,
        }
    }
}

/// Commands for the background flush worker.
#[derive(Debug)]
pub(crate) enum FlushCommand {
    Flush,
    Shutdown,
}

/// Everything guarded by the chain lock.
pub(crate) struct ChainInner {
    pub(crate) hardfork: HardFork,
    pub(crate) alternative_chains: HashMap<Hash, BlockExtendedInfo>,
    pub(crate) invalid_blocks: HashMap<Hash, BlockExtendedInfo>,
    pub(crate) difficulty_cache: DifficultyCache,
    pub(crate) current_block_cumul_sz_limit: u64,
    pub(crate) current_block_cumul_sz_median: u64,
    /// Precomputed PoW hashes (block id -> pow hash) from the pipeline.
    pub(crate) longhash_table: HashMap<Hash, Hash>,
    /// Precomputed output rings from the pipeline.
    pub(crate) scan_table: ScanTable,
    /// Compiled-in hash-of-hashes entries.
    pub(crate) blocks_hash_of_hashes: Vec<Hash>,
    /// Expanded per-height expected block hashes (zero = unknown).
    pub(crate) blocks_hash_check: Vec<Hash>,
    /// Fast-check tx-order sanity list.
    pub(crate) blocks_txs_check: Vec<Hash>,
}

/// The core blockchain engine.
pub struct Blockchain {
    pub(crate) store: Arc<ChainStore>,
    pub(crate) pool: Arc<TxPool>,
    pub(crate) config: ChainConfig,
    pub(crate) checkpoints: Mutex<Checkpoints>,
    pub(crate) inner: Mutex<ChainInner>,
    /// Mempool-position lock of the global order; held across the
    /// prepare/cleanup bracket.
    pub(crate) ingest_lock: RawMutex,
    pub(crate) cancel: AtomicBool,
    pub(crate) sync_counter: AtomicU64,
    pub(crate) flush_sender: Mutex<Option<SyncSender<FlushCommand>>>,
    pub(crate) flush_worker: Mutex<Option<JoinHandle<()>>>,
}

/// Wall-clock time used for future-time limits. Collecting a network-
/// adjusted median is the transport's job; the core sees seconds.
pub(crate) fn adjusted_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Blockchain {
    /// Open the core over a store and mempool, seeding genesis when the
    /// store is empty and recovering from mid-fork shutdowns.
    pub fn new(
        store: Arc<ChainStore>,
        pool: Arc<TxPool>,
        config: ChainConfig,
    ) -> ChainResult<Self> {
        let hardfork = HardFork::new(config.network.fork_table.clone())?;
        let checkpoints = Checkpoints::from_static(&config.network.checkpoints)?;

        let chain = Self {
            store,
            pool,
            config,
            checkpoints: Mutex::new(checkpoints),
            inner: Mutex::new(ChainInner {
                hardfork,
                alternative_chains: HashMap::new(),
                invalid_blocks: HashMap::new(),
                difficulty_cache: DifficultyCache::default(),
                current_block_cumul_sz_limit: 0,
                current_block_cumul_sz_median: 0,
                longhash_table: HashMap::new(),
                scan_table: ScanTable::new(),
                blocks_hash_of_hashes: Vec::new(),
                blocks_hash_check: Vec::new(),
                blocks_txs_check: Vec::new(),
            }),
            ingest_lock: RawMutex::INIT,
            cancel: AtomicBool::new(false),
            sync_counter: AtomicU64::new(0),
            flush_sender: Mutex::new(None),
            flush_worker: Mutex::new(None),
        };
        chain.init()?;
        Ok(chain)
    }

    fn init(&self) -> ChainResult<()> {
        {
            let mut inner = self.inner.lock();
            inner.hardfork.init_from_store(&self.store)?;
        }

        if self.store.height()? == 0 {
            info!("Blockchain not loaded, generating genesis block");
            let genesis = generate_genesis_block(&self.config.network)?;
            let bvc = self.add_new_block(genesis)?;
            if !bvc.added_to_main_chain {
                return Err(ChainError::Fatal(
                    "failed to add genesis block to blockchain".into(),
                ));
            }
        }

        // Recover from a shutdown mid-fork: pop tip blocks whose version
        // disagrees with the schedule.
        let mut num_popped = 0u64;
        {
            let mut inner = self.inner.lock();
            loop {
                let height = self.store.height()?;
                if height <= 1 {
                    break;
                }
                let top = self.store.top_block()?;
                let ideal = inner.hardfork.ideal_version_for_height(height - 1);
                if ideal <= 1 || ideal == top.header.major_version {
                    break;
                }
                if num_popped == 0 {
                    info!(
                        height = height - 1,
                        version = top.header.major_version,
                        ideal,
                        "Top block version disagrees with the ideal version, popping"
                    );
                }
                self.pop_block_locked(&mut inner)?;
                num_popped += 1;
            }
            if num_popped > 0 {
                let height = self.store.height()?;
                inner.difficulty_cache.invalidate();
                inner
                    .hardfork
                    .reorganize_from_chain_height(&self.store, height)?;
                info!(num_popped, height, "Initial popping done");
            }
            self.update_next_cumulative_size_limit(&mut inner)?;
        }

        self.spawn_flush_worker();

        info!(
            height = self.store.height()?,
            "Blockchain initialized"
        );
        Ok(())
    }

    /// Stop background work and flush. The store itself is closed by
    /// dropping its handle.
    pub fn deinit(&self) -> ChainResult<()> {
        debug!("Stopping blockchain read/write activity");
        self.stop_flush_worker();
        if self.config.sync_mode != SyncMode::NoSync {
            self.store_blockchain()?;
        }
        Ok(())
    }

    /// Drop all chain state and re-seed with the supplied genesis block.
    pub fn reset_and_set_genesis_block(&self, genesis: Block) -> ChainResult<bool> {
        {
            let mut inner = self.inner.lock();
            inner.alternative_chains.clear();
            inner.invalid_blocks.clear();
            inner.difficulty_cache.invalidate();
            inner.longhash_table.clear();
            inner.scan_table.clear();
            inner.blocks_txs_check.clear();
            while self.store.height()? > 0 {
                // Discarded on purpose; a reset does not refill the pool.
                self.store.pop_block()?;
            }
            inner.hardfork.reorganize_from_chain_height(&self.store, 0)?;
        }
        let bvc = self.add_new_block(genesis)?;
        {
            let mut inner = self.inner.lock();
            self.update_next_cumulative_size_limit(&mut inner)?;
        }
        Ok(bvc.added_to_main_chain && !bvc.verification_failed)
    }

    // ==================== Cheap queries ====================

    /// Current chain height. Single read-only store call; no chain lock.
    pub fn get_current_blockchain_height(&self) -> ChainResult<u64> {
        Ok(self.store.height()?)
    }

    /// Hash of the top block. Single read-only store call; no chain lock.
    pub fn get_tail_id(&self) -> ChainResult<Hash> {
        Ok(self.store.top_block_hash()?.unwrap_or(Hash::ZERO))
    }

    pub fn have_tx(&self, id: &Hash) -> ChainResult<bool> {
        Ok(self.store.tx_exists(id)?)
    }

    pub fn have_tx_keyimg_as_spent(&self, key_image: &umbra_ringct::KeyImage) -> ChainResult<bool> {
        Ok(self.store.has_key_image(key_image)?)
    }

    /// Whether a block id is known anywhere: main chain, alternates, or
    /// the invalid index.
    pub fn have_block(&self, id: &Hash) -> ChainResult<bool> {
        if self.store.block_exists(id)? {
            return Ok(true);
        }
        let inner = self.inner.lock();
        Ok(inner.alternative_chains.contains_key(id) || inner.invalid_blocks.contains_key(id))
    }

    pub fn get_total_transactions(&self) -> ChainResult<u64> {
        Ok(self.store.total_transactions()?)
    }

    pub fn get_current_cumulative_blocksize_limit(&self) -> u64 {
        self.inner.lock().current_block_cumul_sz_limit
    }

    pub fn get_current_cumulative_blocksize_median(&self) -> u64 {
        self.inner.lock().current_block_cumul_sz_median
    }

    pub fn store(&self) -> &Arc<ChainStore> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<TxPool> {
        &self.pool
    }

    /// Request prompt termination of background pipelines.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    // ==================== Block ingestion ====================

    /// Submit one block. Consensus outcomes are reported in the returned
    /// verification context; only storage faults are errors.
    pub fn add_new_block(&self, block: Block) -> ChainResult<BlockVerificationContext> {
        let id = block.hash();
        let mut bvc = BlockVerificationContext::default();
        let mut inner = self.inner.lock();

        if self.store.block_exists(&id)? || inner.alternative_chains.contains_key(&id) {
            debug!(%id, "Block already exists");
            bvc.already_exists = true;
            inner.blocks_txs_check.clear();
            return Ok(bvc);
        }
        if inner.invalid_blocks.contains_key(&id) {
            warn!(%id, "Block was previously marked invalid");
            bvc.verification_failed = true;
            inner.blocks_txs_check.clear();
            return Ok(bvc);
        }

        let tail = self.store.top_block_hash()?.unwrap_or(Hash::ZERO);
        if self.store.height()? > 0 && block.header.prev_id != tail {
            // Chain switching or wrong block.
            self.handle_alternative_block(&mut inner, &block, &id, &mut bvc)?;
            inner.blocks_txs_check.clear();
            return Ok(bvc);
        }

        self.handle_block_to_main_chain(&mut inner, &block, &id, &mut bvc)?;
        Ok(bvc)
    }

    /// Apply a block that extends the current tip. Serial under the chain
    /// lock. Returns whether the block was accepted.
    pub(crate) fn handle_block_to_main_chain(
        &self,
        inner: &mut ChainInner,
        block: &Block,
        id: &Hash,
        bvc: &mut BlockVerificationContext,
    ) -> ChainResult<bool> {
        let height = self.store.height()?;
        let tail = self.store.top_block_hash()?.unwrap_or(Hash::ZERO);
        if height > 0 && block.header.prev_id != tail {
            warn!(%id, prev = %block.header.prev_id, expected = %tail, "Block has wrong prev_id");
            return Ok(false);
        }

        if block.header.major_version > inner.hardfork.ideal_version() {
            warn!(
                version = block.header.major_version,
                "A block was seen with a version higher than the last known one; \
                 a software update may be required to sync further"
            );
        }

        if !inner.hardfork.check_for_height(block, height) {
            warn!(%id, version = block.header.major_version, height, "Block has wrong version");
            bvc.verification_failed = true;
            return Ok(false);
        }

        if let Err(e) = self.check_block_timestamp_main(inner, block, height) {
            warn!(%id, error = %e, "Block has invalid timestamp");
            bvc.verification_failed = true;
            return Ok(false);
        }

        let current_diffic = self.get_difficulty_for_next_block(inner)?;

        // PoW, or the precomputed fast path over the compiled-in hashes.
        let mut fast_check = false;
        if self.config.fast_sync && (height as usize) < inner.blocks_hash_check.len() {
            let expected = inner.blocks_hash_check[height as usize];
            if !expected.is_zero() {
                if *id != expected {
                    warn!(%id, height, "Block id disagrees with precomputed hash");
                    bvc.verification_failed = true;
                    return Ok(false);
                }
                fast_check = true;
            }
        }
        if !fast_check {
            let proof_of_work = match inner.longhash_table.get(id) {
                Some(pow) => *pow,
                None => get_block_longhash(block),
            };
            if !check_hash(&proof_of_work, current_diffic) {
                warn!(%id, %proof_of_work, difficulty = current_diffic, "Not enough proof of work");
                bvc.verification_failed = true;
                return Ok(false);
            }
        }

        {
            let checkpoints = self.checkpoints.lock();
            if checkpoints.is_in_checkpoint_zone(height) {
                let (ok, _) = checkpoints.check_block(height, id);
                if !ok {
                    error!(%id, height, "CHECKPOINT VALIDATION FAILED");
                    bvc.verification_failed = true;
                    return Ok(false);
                }
            }
        }

        if let Err(e) = prevalidate_miner_transaction(block, height) {
            warn!(%id, error = %e, "Block failed coinbase prevalidation");
            bvc.verification_failed = true;
            return Ok(false);
        }

        // Pull the listed transactions out of the pool and verify them.
        let coinbase_blob_size = block.miner_tx.blob_size() as u64;
        let mut cumulative_block_size = coinbase_blob_size;
        let mut fee_summary = 0u64;
        let mut txs: Vec<Transaction> = Vec::with_capacity(block.tx_hashes.len());

        for (tx_index, tx_hash) in block.tx_hashes.iter().enumerate() {
            if self.store.tx_exists(tx_hash)? {
                warn!(%id, %tx_hash, "Block lists a transaction already in the chain");
                bvc.verification_failed = true;
                self.return_tx_to_pool(txs);
                return Ok(false);
            }

            let Some(entry) = self.pool.take_tx(tx_hash) else {
                warn!(%id, %tx_hash, "Block lists an unknown transaction");
                bvc.verification_failed = true;
                self.return_tx_to_pool(txs);
                return Ok(false);
            };
            let (tx, blob_size, fee) = (entry.tx, entry.blob_size, entry.fee);
            txs.push(tx.clone());

            if !fast_check {
                let mut tvc = TxVerificationContext::default();
                if !check_tx_outputs(&inner.hardfork, height, &tx, &mut tvc) {
                    warn!(%id, %tx_hash, "Block has a transaction with invalid outputs");
                    self.add_block_as_invalid(inner, block, id);
                    bvc.verification_failed = true;
                    self.return_tx_to_pool(txs);
                    return Ok(false);
                }
                let verifier =
                    TxVerifier::new(&self.store, &inner.hardfork, height, adjusted_time());
                match verifier.check_tx_inputs(&tx, &mut tvc, Some(&inner.scan_table)) {
                    Ok(Some(_max_used_height)) => {}
                    Ok(None) => {
                        warn!(%id, %tx_hash, "Block has a transaction with wrong inputs");
                        self.add_block_as_invalid(inner, block, id);
                        bvc.verification_failed = true;
                        self.return_tx_to_pool(txs);
                        return Ok(false);
                    }
                    Err(e) => {
                        self.return_tx_to_pool(txs);
                        return Err(e.into());
                    }
                }
            } else if tx_index >= inner.blocks_txs_check.len()
                || inner.blocks_txs_check[tx_index] != *tx_hash
            {
                warn!(%id, %tx_hash, "Fast check tx order mismatch");
                self.add_block_as_invalid(inner, block, id);
                bvc.verification_failed = true;
                self.return_tx_to_pool(txs);
                return Ok(false);
            }

            fee_summary += fee;
            cumulative_block_size += blob_size;
        }
        inner.blocks_txs_check.clear();

        // Reward validation.
        let already_generated_coins = if height > 0 {
            self.store.already_generated_coins(height - 1)?
        } else {
            0
        };
        let median_size = self.reward_window_median(height)?;
        let reward_result = if inner.hardfork.check_feature(Feature::DevFund, height) {
            validate_miner_transaction_v2(
                &self.config.network,
                block,
                height,
                median_size,
                cumulative_block_size,
                fee_summary,
                already_generated_coins,
            )
        } else {
            validate_miner_transaction_v1(
                block,
                median_size,
                cumulative_block_size,
                fee_summary,
                already_generated_coins,
                height,
            )
        };
        let base_reward = match reward_result {
            Ok((base_reward, partial)) => {
                bvc.partial_block_reward = partial;
                base_reward
            }
            Err(e) => {
                warn!(%id, error = %e, "Block has incorrect miner transaction");
                bvc.verification_failed = true;
                self.return_tx_to_pool(txs);
                return Ok(false);
            }
        };

        // Metadata for the committed record. In the tail state the
        // generated-coins counter saturates at the supply cap.
        let cumulative_difficulty = current_diffic
            + if height > 0 {
                self.store.cumulative_difficulty(height - 1)?
            } else {
                0
            };
        let already_generated_coins = if base_reward < params::MONEY_SUPPLY - already_generated_coins
        {
            already_generated_coins + base_reward
        } else {
            params::MONEY_SUPPLY
        };

        let new_height = match self.store.append_block(
            block,
            cumulative_block_size,
            cumulative_difficulty,
            already_generated_coins,
            &txs,
        ) {
            Ok(new_height) => new_height,
            Err(StorageError::KeyImageExists(what)) => {
                error!(%id, %what, "Double spend race detected while committing block");
                bvc.verification_failed = true;
                self.return_tx_to_pool(txs);
                return Ok(false);
            }
            Err(e) => {
                error!(%id, error = %e, "Error adding block to blockchain");
                self.return_tx_to_pool(txs);
                return Err(e.into());
            }
        };

        inner.hardfork.add(&self.store, block)?;
        self.update_next_cumulative_size_limit(inner)?;

        info!(
            %id,
            height = new_height - 1,
            difficulty = current_diffic,
            reward = base_reward + fee_summary,
            coinbase_blob_size,
            cumulative_block_size,
            "+++++ BLOCK SUCCESSFULLY ADDED"
        );

        bvc.added_to_main_chain = true;
        self.sync_counter.fetch_add(1, Ordering::Relaxed);
        self.pool.on_blockchain_inc(new_height, id);
        Ok(true)
    }

    /// Pop the top block, returning its transactions to the pool.
    pub fn pop_block_from_blockchain(&self) -> ChainResult<Block> {
        let mut inner = self.inner.lock();
        self.pop_block_locked(&mut inner)
    }

    pub(crate) fn pop_block_locked(&self, inner: &mut ChainInner) -> ChainResult<Block> {
        inner.difficulty_cache.invalidate();
        let (block, txs) = self.store.pop_block()?;
        self.return_tx_to_pool(txs);

        inner.longhash_table.clear();
        inner.scan_table.clear();
        inner.blocks_txs_check.clear();

        self.update_next_cumulative_size_limit(inner)?;
        let height = self.store.height()?;
        self.pool
            .on_blockchain_dec(height.saturating_sub(1), &self.get_tail_id()?);
        Ok(block)
    }

    pub(crate) fn return_tx_to_pool(&self, txs: Vec<Transaction>) {
        for tx in txs {
            if tx.is_coinbase() {
                continue;
            }
            let id = tx.hash();
            // If they were in a block the network has seen them already;
            // do not make every node re-relay a reorg's worth of txs.
            if let Err(e) = self.pool.add_tx(tx, true, true, false) {
                error!(%id, error = %e, "Failed to return taken transaction to pool");
            }
        }
    }

    pub(crate) fn add_block_as_invalid(&self, inner: &mut ChainInner, block: &Block, id: &Hash) {
        let bei = BlockExtendedInfo {
            block: block.clone(),
            height: block.height(),
            cumulative_difficulty: 0,
            already_generated_coins: 0,
            block_size: 0,
        };
        self.add_bei_as_invalid(inner, bei, id);
    }

    pub(crate) fn add_bei_as_invalid(
        &self,
        inner: &mut ChainInner,
        bei: BlockExtendedInfo,
        id: &Hash,
    ) {
        let prev = bei.block.header.prev_id;
        inner.invalid_blocks.insert(*id, bei);
        info!(
            %id,
            %prev,
            count = inner.invalid_blocks.len(),
            "BLOCK ADDED AS INVALID"
        );
    }

    // ==================== Difficulty ====================

    /// Difficulty target for the next main-chain block, with the sliding
    /// window cache and the bootstrap pins.
    pub(crate) fn get_difficulty_for_next_block(
        &self,
        inner: &mut ChainInner,
    ) -> ChainResult<Difficulty> {
        let height = self.store.height()?;
        if height == 0 {
            return Ok(1);
        }

        for (start, end, pin) in &self.config.network.difficulty_pins {
            if height >= *start && height <= *end {
                return Ok(*pin);
            }
        }

        let block_count = difficulty_blocks_count(&inner.hardfork, height);
        let cache = &mut inner.difficulty_cache;
        let fresh_slide = cache.computed_height != 0
            && height == cache.computed_height + 1
            && cache.timestamps.len() >= block_count;

        if fresh_slide {
            let index = height - 1;
            cache.timestamps.push(self.store.block_timestamp(index)?);
            cache
                .difficulties
                .push(self.store.cumulative_difficulty(index)?);
            while cache.timestamps.len() > block_count {
                cache.timestamps.remove(0);
            }
            while cache.difficulties.len() > block_count {
                cache.difficulties.remove(0);
            }
        } else {
            let mut offset = height - (block_count as u64).min(height);
            if offset == 0 {
                offset += 1; // skip genesis
            }
            cache.timestamps.clear();
            cache.difficulties.clear();
            for h in offset..height {
                cache.timestamps.push(self.store.block_timestamp(h)?);
                cache
                    .difficulties
                    .push(self.store.cumulative_difficulty(h)?);
            }
        }
        cache.computed_height = height;

        Ok(next_difficulty(
            &inner.hardfork,
            height,
            &inner.difficulty_cache.timestamps,
            &inner.difficulty_cache.difficulties,
        ))
    }

    /// Public query form.
    pub fn block_difficulty_for_next_block(&self) -> ChainResult<Difficulty> {
        let mut inner = self.inner.lock();
        self.get_difficulty_for_next_block(&mut inner)
    }

    /// Difficulty of the committed block at `height` (its window delta).
    pub fn block_difficulty(&self, height: u64) -> ChainResult<Difficulty> {
        let at = self.store.cumulative_difficulty(height)?;
        if height == 0 {
            return Ok(at);
        }
        Ok(at - self.store.cumulative_difficulty(height - 1)?)
    }

    // ==================== Timestamps & size windows ====================

    pub(crate) fn future_time_limit(&self, inner: &ChainInner, height: u64) -> u64 {
        if inner.hardfork.check_feature(Feature::DifficultyV3, height) {
            params::BLOCK_FUTURE_TIME_LIMIT_V3
        } else {
            params::BLOCK_FUTURE_TIME_LIMIT_V2
        }
    }

    pub(crate) fn timestamp_check_window(&self, inner: &ChainInner, height: u64) -> usize {
        if inner.hardfork.check_feature(Feature::DifficultyV3, height) {
            params::TIMESTAMP_CHECK_WINDOW_V3
        } else if inner.hardfork.check_feature(Feature::DifficultyV2, height) {
            params::TIMESTAMP_CHECK_WINDOW_V2
        } else {
            params::TIMESTAMP_CHECK_WINDOW_V1
        }
    }

    fn check_block_timestamp_main(
        &self,
        inner: &ChainInner,
        block: &Block,
        height: u64,
    ) -> ChainResult<()> {
        let future_limit = self.future_time_limit(inner, height);
        check_block_timestamp(block.header.timestamp, adjusted_time(), future_limit)?;

        let window = self.timestamp_check_window(inner, height);
        if height < window as u64 {
            // Not enough blocks for a meaningful median yet.
            return Ok(());
        }
        let mut timestamps = Vec::with_capacity(window);
        for h in height - window as u64..height {
            timestamps.push(self.store.block_timestamp(h)?);
        }
        let backdate = inner
            .hardfork
            .check_feature(Feature::CheckBlockBackdate, height);
        check_block_timestamp_window(&timestamps, block, backdate, future_limit)?;
        Ok(())
    }

    /// Splice main-chain timestamps under an alt chain's own until the
    /// active window is filled.
    pub(crate) fn complete_timestamps_vector(
        &self,
        inner: &ChainInner,
        start_top_height: u64,
        timestamps: &mut Vec<u64>,
    ) -> ChainResult<()> {
        let window = self.timestamp_check_window(inner, self.store.height()?);
        if timestamps.len() >= window {
            return Ok(());
        }
        let need = window - timestamps.len();
        let mut h = start_top_height;
        let stop = h.saturating_sub(need as u64);
        while h > stop {
            timestamps.push(self.store.block_timestamp(h)?);
            h -= 1;
        }
        Ok(())
    }

    pub(crate) fn reward_window_median(&self, height: u64) -> ChainResult<u64> {
        let count = (params::REWARD_BLOCKS_WINDOW as u64).min(height);
        let mut sizes = Vec::with_capacity(count as usize);
        for h in height - count..height {
            sizes.push(self.store.block_size(h)?);
        }
        Ok(median(&sizes))
    }

    pub(crate) fn update_next_cumulative_size_limit(
        &self,
        inner: &mut ChainInner,
    ) -> ChainResult<()> {
        let height = self.store.height()?;
        let median_size = self.reward_window_median(height)?;
        inner.current_block_cumul_sz_median = median_size;
        let floored = median_size.max(params::BLOCK_SIZE_GROWTH_FAVORED_ZONE);
        inner.current_block_cumul_sz_limit = floored * 2;
        Ok(())
    }

    // ==================== Checkpoints & fast sync ====================

    /// Merge checkpoints from a JSON document and enforce them against the
    /// local chain (rolling back when `enforce` is set). DNS delivery of
    /// the same document is an external collaborator; `offline` nodes
    /// never see it.
    pub fn update_checkpoints(&self, json: &str) -> ChainResult<bool> {
        {
            let mut checkpoints = self.checkpoints.lock();
            if checkpoints.load_from_json(json).is_err() {
                return Ok(false);
            }
        }
        self.check_against_checkpoints(self.config.enforce_dns_checkpoints)?;
        Ok(true)
    }

    /// Verify the local chain against the checkpoint set; on mismatch,
    /// enforce by rolling back to just below the checkpoint.
    pub fn check_against_checkpoints(&self, enforce: bool) -> ChainResult<()> {
        let points: Vec<(u64, Hash)> = {
            let checkpoints = self.checkpoints.lock();
            checkpoints.points().iter().map(|(h, p)| (*h, *p)).collect()
        };
        let mut inner = self.inner.lock();
        for (height, expected) in points {
            if height >= self.store.height()? {
                continue;
            }
            let actual = self.store.block_hash_at(height)?;
            if actual != expected {
                if enforce {
                    error!(height, "Local blockchain failed to pass a checkpoint, rolling back");
                    self.rollback_blockchain_switching(
                        &mut inner,
                        Vec::new(),
                        height.saturating_sub(2),
                    )?;
                } else {
                    error!(
                        height,
                        "WARNING: local blockchain failed to pass a checkpoint, \
                         you could be on a fork"
                    );
                }
            }
        }
        Ok(())
    }

    /// Install a compiled-in hash-of-hashes table (already digest-checked
    /// and parsed). Expands the per-height expected-hash table consumed by
    /// the fast-check path.
    pub fn load_compiled_in_block_hashes(&self, entries: Vec<Hash>) {
        let mut inner = self.inner.lock();
        inner.blocks_hash_check =
            vec![Hash::ZERO; entries.len() * umbra_consensus::params::HASH_OF_HASHES_STEP];
        inner.blocks_hash_of_hashes = entries;
        info!(
            groups = inner.blocks_hash_of_hashes.len(),
            "Block hash-of-hashes table loaded"
        );
    }

    /// Whether a height is covered by the compiled-in hash table.
    pub fn is_within_compiled_block_hash_area(&self, height: u64) -> bool {
        let inner = self.inner.lock();
        (height as usize)
            < inner.blocks_hash_of_hashes.len() * umbra_consensus::params::HASH_OF_HASHES_STEP
    }

    /// Validate a span of incoming block hashes against the compiled-in
    /// table, expanding verified entries into the fast-check table.
    /// Returns how many leading hashes are usable.
    pub fn prevalidate_block_hashes(&self, height: u64, hashes: &[Hash]) -> ChainResult<u64> {
        let step = umbra_consensus::params::HASH_OF_HASHES_STEP;
        let mut inner = self.inner.lock();

        if hashes.is_empty()
            || height as usize >= inner.blocks_hash_of_hashes.len() * step
            || inner.blocks_hash_check.is_empty()
        {
            return Ok(hashes.len() as u64);
        }

        let first_index = height as usize / step;
        let last_index = (height as usize + hashes.len() - 1) / step;

        // Left-pad with hashes already on the chain so the first group is
        // complete.
        let mut data: Vec<Hash> = Vec::with_capacity(hashes.len() + step);
        for h in (first_index * step) as u64..height {
            data.push(self.store.block_hash_at(h)?);
        }
        data.extend_from_slice(hashes);

        let mut usable = (first_index * step) as i128 - height as i128;
        for n in first_index..=last_index {
            if n >= inner.blocks_hash_of_hashes.len() {
                usable += step as i128;
                break;
            }
            let begin = (n - first_index) * step;
            if data.len() < begin + step {
                break;
            }
            let folded = umbra_consensus::hash_of_hashes_fold(&data[begin..begin + step]);
            if folded != inner.blocks_hash_of_hashes[n] {
                warn!(
                    first = n * step,
                    last = n * step + step - 1,
                    "Invalid hash for block group"
                );
                break;
            }
            for i in 0..step {
                inner.blocks_hash_check[n * step + i] = data[begin + i];
            }
            usable += step as i128;
        }

        let usable = usable.clamp(0, hashes.len() as i128) as u64;
        debug!(usable, total = hashes.len(), "Prevalidated block hashes");
        Ok(usable)
    }
}

impl Drop for Blockchain {
    fn drop(&mut self) {
        self.stop_flush_worker();
    }
}
