//! The prepare pipeline: amortizes parse, PoW, and output lookups across a
//! batch of incoming blocks, and the sync-policy plumbing that brackets it.
//!
//! Lock order is global and fixed: the mempool-position ingest lock, then
//! the chain lock, then the store batch. The ingest lock is taken here and
//! released in `cleanup_handle_incoming_blocks`.

use crate::chain::{Blockchain, FlushCommand, SyncMode};
use crate::ChainResult;
use parking_lot::lock_api::RawMutex as _;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use umbra_storage::{OutputRecord, StorageError};
use umbra_types::{relative_output_offsets_to_absolute, Block, Hash, Transaction, TxIn};

/// One raw block with its transaction blobs, as received from a peer.
#[derive(Debug, Clone)]
pub struct BlockCompleteEntry {
    pub block: Vec<u8>,
    pub txs: Vec<Vec<u8>>,
}

impl Blockchain {
    /// Open a batch-ingest bracket: reserve the store batch, precompute
    /// PoW hashes across workers, and assemble the output-scan table.
    ///
    /// Returns `Ok(false)` when cancelled. Either way the bracket is open
    /// and the caller must close it with
    /// [`Blockchain::cleanup_handle_incoming_blocks`].
    pub fn prepare_handle_incoming_blocks(
        &self,
        blocks_entry: &[BlockCompleteEntry],
    ) -> ChainResult<bool> {
        self.ingest_lock.lock();

        if blocks_entry.is_empty() {
            return Ok(false);
        }

        // Reserve the store batch, backing off with both locks released
        // so readers and the verifier make progress meanwhile.
        loop {
            {
                let _inner = self.inner.lock();
                if self.store.batch_start() {
                    break;
                }
            }
            unsafe { self.ingest_lock.unlock() };
            std::thread::sleep(Duration::from_secs(1));
            self.ingest_lock.lock();
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(false);
            }
        }

        let mut inner = self.inner.lock();

        // First pass: parse, filter duplicates, bail out early if the
        // batch doesn't extend our chain.
        let top = self.store.top_block_hash()?.unwrap_or(Hash::ZERO);
        let mut blocks: Vec<Block> = Vec::with_capacity(blocks_entry.len());
        for (i, entry) in blocks_entry.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(false);
            }
            let Ok(block) = Block::from_blob(&entry.block) else {
                continue;
            };
            if i == 0 && block.header.prev_id != top {
                debug!("Skipping prepare blocks: new blocks don't belong to chain");
                return Ok(true);
            }
            let id = block.hash();
            if self.store.block_exists(&id)?
                || inner.alternative_chains.contains_key(&id)
                || inner.invalid_blocks.contains_key(&id)
            {
                debug!("Skipping prepare blocks: blocks exist");
                return Ok(true);
            }
            blocks.push(block);
        }

        // Skip PoW precompute for heights the compiled-in hash table will
        // fast-check anyway.
        let fast_covered = self.config.fast_sync
            && (self.store.height()? as usize + blocks.len()) < inner.blocks_hash_check.len();

        inner.longhash_table.clear();
        if !fast_covered {
            let threads = self
                .config
                .max_prepare_threads
                .min(
                    std::thread::available_parallelism()
                        .map(|n| n.get())
                        .unwrap_or(1),
                )
                .max(1);

            if blocks.len() > 1 && threads > 1 {
                let chunk_size = blocks.len().div_ceil(threads);
                let cancel = &self.cancel;
                let maps: Vec<Vec<(Hash, Hash)>> = std::thread::scope(|scope| {
                    let handles: Vec<_> = blocks
                        .chunks(chunk_size)
                        .map(|chunk| {
                            scope.spawn(move || {
                                let mut map = Vec::with_capacity(chunk.len());
                                for block in chunk {
                                    if cancel.load(Ordering::SeqCst) {
                                        break;
                                    }
                                    map.push((
                                        block.hash(),
                                        umbra_consensus::get_block_longhash(block),
                                    ));
                                }
                                map
                            })
                        })
                        .collect();
                    handles
                        .into_iter()
                        .map(|h| h.join().unwrap_or_default())
                        .collect()
                });
                for map in maps {
                    for (id, pow) in map {
                        inner.longhash_table.insert(id, pow);
                    }
                }
            } else {
                for block in &blocks {
                    if self.cancel.load(Ordering::SeqCst) {
                        return Ok(false);
                    }
                    inner
                        .longhash_table
                        .insert(block.hash(), umbra_consensus::get_block_longhash(block));
                }
            }
        }

        if self.cancel.load(Ordering::SeqCst) {
            return Ok(false);
        }

        // Second pass: aggregate all input amounts and absolute offsets,
        // deduplicate, bulk-read the output records, and assemble the
        // (tx prefix, key image) -> ring cache.
        inner.scan_table.clear();
        let mut offset_map: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        let mut parsed_txs: Vec<(Hash, Transaction)> = Vec::new();

        for entry in blocks_entry {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(false);
            }
            for tx_blob in &entry.txs {
                let Ok(tx) = Transaction::from_blob(tx_blob) else {
                    warn!("Could not parse tx from incoming blocks");
                    inner.scan_table.clear();
                    return Ok(false);
                };
                let prefix_hash = tx.prefix_hash();
                if !inner.scan_table.add_tx(prefix_hash) {
                    warn!("Duplicate tx found in incoming blocks");
                    inner.scan_table.clear();
                    return Ok(false);
                }
                for txin in &tx.vin {
                    if let TxIn::ToKey {
                        amount,
                        key_offsets,
                        ..
                    } = txin
                    {
                        offset_map
                            .entry(*amount)
                            .or_default()
                            .extend(relative_output_offsets_to_absolute(key_offsets));
                    }
                }
                parsed_txs.push((prefix_hash, tx));
            }
        }

        for offsets in offset_map.values_mut() {
            offsets.sort_unstable();
            offsets.dedup();
        }

        // Fan out the per-amount bulk reads.
        let fetched = self.fetch_output_map(&offset_map)?;

        for (prefix_hash, tx) in parsed_txs {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(false);
            }
            for txin in &tx.vin {
                let TxIn::ToKey {
                    amount,
                    key_offsets,
                    key_image,
                } = txin
                else {
                    continue;
                };
                let absolute = relative_output_offsets_to_absolute(key_offsets);
                let mut outputs: Vec<OutputRecord> = Vec::with_capacity(absolute.len());
                if let Some(per_amount) = fetched.get(amount) {
                    for offset in &absolute {
                        match per_amount.get(offset) {
                            Some(record) => outputs.push(*record),
                            None => break,
                        }
                    }
                }
                if !inner.scan_table.add_ring(&prefix_hash, *key_image, outputs) {
                    warn!("Duplicate key image found in incoming blocks");
                    inner.scan_table.clear();
                    return Ok(false);
                }
            }
        }

        debug!(
            blocks = blocks.len(),
            amounts = offset_map.len(),
            "Prepared incoming blocks"
        );
        Ok(true)
    }

    /// Bulk-read all referenced outputs, partitioned by amount across the
    /// worker budget. Missing offsets are simply absent from the result
    /// (the verifier fails the tx later).
    fn fetch_output_map(
        &self,
        offset_map: &BTreeMap<u64, Vec<u64>>,
    ) -> ChainResult<BTreeMap<u64, BTreeMap<u64, OutputRecord>>> {
        fn fetch_amount(
            store: &umbra_storage::ChainStore,
            amount: u64,
            offsets: &[u64],
        ) -> Result<BTreeMap<u64, OutputRecord>, StorageError> {
            let mut found = BTreeMap::new();
            for offset in offsets {
                match store.output(amount, *offset) {
                    Ok(record) => {
                        found.insert(*offset, record);
                    }
                    Err(StorageError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(found)
        }

        let amounts: Vec<(&u64, &Vec<u64>)> = offset_map.iter().collect();
        let threads = self.config.max_prepare_threads.max(1);
        let mut result = BTreeMap::new();

        if amounts.len() > 1 && threads > 1 {
            let chunk_size = amounts.len().div_ceil(threads);
            let store = &self.store;
            let fetched: Vec<Result<Vec<(u64, BTreeMap<u64, OutputRecord>)>, StorageError>> =
                std::thread::scope(|scope| {
                    let handles: Vec<_> = amounts
                        .chunks(chunk_size)
                        .map(|chunk| {
                            scope.spawn(
                                move || -> Result<
                                    Vec<(u64, BTreeMap<u64, OutputRecord>)>,
                                    StorageError,
                                > {
                                    let mut out = Vec::with_capacity(chunk.len());
                                    for (amount, offsets) in chunk {
                                        out.push((
                                            **amount,
                                            fetch_amount(store, **amount, offsets.as_slice())?,
                                        ));
                                    }
                                    Ok(out)
                                },
                            )
                        })
                        .collect();
                    handles
                        .into_iter()
                        .map(|h| {
                            h.join().unwrap_or_else(|_| {
                                Err(StorageError::Inconsistent("output scan worker panicked".into()))
                            })
                        })
                        .collect()
                });
            for part in fetched {
                for (amount, found) in part? {
                    result.insert(amount, found);
                }
            }
        } else {
            for (amount, offsets) in amounts {
                result.insert(*amount, fetch_amount(&self.store, *amount, offsets)?);
            }
        }
        Ok(result)
    }

    /// Close a batch-ingest bracket: stop the store batch, run the sync
    /// policy, clear the prepare caches, release the ingest lock.
    pub fn cleanup_handle_incoming_blocks(&self, force_sync: bool) -> ChainResult<bool> {
        let mut success = true;
        {
            let mut inner = self.inner.lock();
            self.store.batch_stop();

            let counter = self.sync_counter.load(Ordering::Relaxed);
            if counter > 0 {
                if force_sync {
                    if self.config.sync_mode != SyncMode::NoSync {
                        if let Err(e) = self.store_blockchain() {
                            error!(error = %e, "Forced blockchain store failed");
                            success = false;
                        }
                    }
                    self.sync_counter.store(0, Ordering::Relaxed);
                } else if self.config.blocks_per_sync > 0 && counter >= self.config.blocks_per_sync
                {
                    match self.config.sync_mode {
                        SyncMode::Async | SyncMode::Default => {
                            self.sync_counter.store(0, Ordering::Relaxed);
                            self.dispatch_flush();
                        }
                        SyncMode::Sync => {
                            if let Err(e) = self.store_blockchain() {
                                error!(error = %e, "Blockchain store failed");
                                success = false;
                            }
                        }
                        SyncMode::NoSync => {
                            // Not required to call sync.
                        }
                    }
                }
            }

            inner.longhash_table.clear();
            inner.scan_table.clear();
            inner.blocks_txs_check.clear();

            // When we're well clear of the precomputed hashes, free them.
            let height = self.store.height()?;
            if !inner.blocks_hash_check.is_empty()
                && height > inner.blocks_hash_check.len() as u64 + 4096
            {
                info!(
                    covered = inner.blocks_hash_check.len(),
                    "Dumping precomputed block hashes"
                );
                inner.blocks_hash_check = Vec::new();
                inner.blocks_hash_of_hashes = Vec::new();
            }
        }

        unsafe { self.ingest_lock.unlock() };
        Ok(success)
    }

    /// Flush the store synchronously.
    pub fn store_blockchain(&self) -> ChainResult<()> {
        if let Err(e) = self.store.sync() {
            error!(error = %e, "Error syncing blockchain db, shutting down to prevent issues");
            return Err(e.into());
        }
        debug!("Blockchain stored OK");
        Ok(())
    }

    pub(crate) fn spawn_flush_worker(&self) {
        if !matches!(self.config.sync_mode, SyncMode::Async | SyncMode::Default) {
            return;
        }
        // One-slot channel: a pending flush coalesces later requests.
        let (sender, receiver) = mpsc::sync_channel::<FlushCommand>(1);
        let store = Arc::clone(&self.store);
        let handle = std::thread::Builder::new()
            .name("chain-flush".into())
            .spawn(move || {
                while let Ok(command) = receiver.recv() {
                    match command {
                        FlushCommand::Flush => {
                            if let Err(e) = store.sync() {
                                error!(error = %e, "Async blockchain store failed");
                            }
                        }
                        FlushCommand::Shutdown => break,
                    }
                }
            })
            .expect("Failed to spawn flush worker thread");
        *self.flush_sender.lock() = Some(sender);
        *self.flush_worker.lock() = Some(handle);
    }

    pub(crate) fn stop_flush_worker(&self) {
        if let Some(sender) = self.flush_sender.lock().take() {
            let _ = sender.send(FlushCommand::Shutdown);
        }
        if let Some(handle) = self.flush_worker.lock().take() {
            let _ = handle.join();
        }
    }

    fn dispatch_flush(&self) {
        if let Some(sender) = &*self.flush_sender.lock() {
            // A full slot means a flush is already queued.
            let _ = sender.try_send(FlushCommand::Flush);
        }
    }
}
