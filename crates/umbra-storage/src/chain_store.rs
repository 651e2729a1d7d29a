//! Typed chain-store facade.
//!
//! All chain reads and writes go through this facade. An appended or popped
//! block is a single atomic batch: the block blob, its transactions, their
//! output-index entries, their key images, and the per-height metadata
//! either all land or none do. A failed append leaves the store logically
//! unchanged.

use crate::{ColumnFamily, Storage, StorageError, StorageResult, WriteBatch};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};
use umbra_ringct::{zero_commit, Commitment, KeyImage, PublicKey};
use umbra_types::{Block, ByteReader, ByteWriter, Difficulty, Hash, Transaction};

const META_CHAIN_HEIGHT: &[u8] = b"chain_height";
const META_TOP_BLOCK_HASH: &[u8] = b"top_block_hash";
const META_TX_COUNT: &[u8] = b"tx_count";

/// Per-height block metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfoRecord {
    pub block_size: u64,
    pub timestamp: u64,
    pub cumulative_difficulty: Difficulty,
    pub already_generated_coins: u64,
}

impl BlockInfoRecord {
    fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(40);
        w.put_u64(self.block_size);
        w.put_u64(self.timestamp);
        w.put_u128(self.cumulative_difficulty);
        w.put_u64(self.already_generated_coins);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> StorageResult<Self> {
        let mut r = ByteReader::new(bytes);
        let record = Self {
            block_size: r.get_u64()?,
            timestamp: r.get_u64()?,
            cumulative_difficulty: r.get_u128()?,
            already_generated_coins: r.get_u64()?,
        };
        r.finish()?;
        Ok(record)
    }
}

/// One entry of the per-amount global output index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputRecord {
    pub key: PublicKey,
    pub commitment: Commitment,
    pub origin_tx: Hash,
    pub unlock_time: u64,
    pub height: u64,
}

impl OutputRecord {
    fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(112);
        w.put_bytes32(&self.key.0);
        w.put_bytes32(&self.commitment.0);
        w.put_hash(&self.origin_tx);
        w.put_u64(self.unlock_time);
        w.put_u64(self.height);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> StorageResult<Self> {
        let mut r = ByteReader::new(bytes);
        let record = Self {
            key: PublicKey(r.get_bytes32()?),
            commitment: Commitment(r.get_bytes32()?),
            origin_tx: r.get_hash()?,
            unlock_time: r.get_u64()?,
            height: r.get_u64()?,
        };
        r.finish()?;
        Ok(record)
    }
}

fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

fn output_key(amount: u64, index: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&amount.to_be_bytes());
    key[8..].copy_from_slice(&index.to_be_bytes());
    key
}

/// The index an output lands in, and the commitment recorded for it.
///
/// Confidential outputs carry their own commitment; plaintext outputs of
/// v2+ coinbase transactions join the amount-0 index under the
/// deterministic zero commitment so rings can reference them.
fn output_slot(tx: &Transaction, vout_index: usize) -> StorageResult<(u64, Commitment)> {
    let out = &tx.vout[vout_index];
    if tx.version >= 2 {
        let commitment = if tx.is_coinbase() {
            zero_commit(out.amount)
        } else {
            *tx.rct.out_commitments.get(vout_index).ok_or_else(|| {
                StorageError::Inconsistent(format!(
                    "tx {} missing commitment for output {}",
                    tx.hash(),
                    vout_index
                ))
            })?
        };
        Ok((0, commitment))
    } else {
        Ok((out.amount, zero_commit(out.amount)))
    }
}

/// Typed read/write interface over the persistent chain tables.
pub struct ChainStore {
    storage: Arc<dyn Storage>,
    batch_active: AtomicBool,
}

impl ChainStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            batch_active: AtomicBool::new(false),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    // ==================== Metadata ====================

    fn get_meta_u64(&self, key: &[u8]) -> StorageResult<u64> {
        match self.storage.get(ColumnFamily::Metadata, key)? {
            Some(bytes) if bytes.len() == 8 => {
                Ok(u64::from_be_bytes(bytes.as_slice().try_into().unwrap()))
            }
            Some(_) => Err(StorageError::Inconsistent(format!(
                "bad metadata width for {}",
                String::from_utf8_lossy(key)
            ))),
            None => Ok(0),
        }
    }

    /// Raw metadata access for collaborators persisting alongside the chain
    /// (hard-fork vote state).
    pub fn get_metadata(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.storage.get(ColumnFamily::Metadata, key)
    }

    pub fn put_metadata(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.storage.put(ColumnFamily::Metadata, key, value)
    }

    // ==================== Chain shape ====================

    /// Current chain height (number of blocks; genesis makes it 1).
    pub fn height(&self) -> StorageResult<u64> {
        self.get_meta_u64(META_CHAIN_HEIGHT)
    }

    /// Hash of the top block, if the chain is non-empty.
    pub fn top_block_hash(&self) -> StorageResult<Option<Hash>> {
        match self.storage.get(ColumnFamily::Metadata, META_TOP_BLOCK_HASH)? {
            Some(bytes) => Ok(Hash::from_slice(&bytes)),
            None => Ok(None),
        }
    }

    pub fn block_exists(&self, id: &Hash) -> StorageResult<bool> {
        self.storage.contains(ColumnFamily::BlockHeightByHash, &id.0)
    }

    /// Main-chain height of a block, if present.
    pub fn block_height(&self, id: &Hash) -> StorageResult<Option<u64>> {
        match self.storage.get(ColumnFamily::BlockHeightByHash, &id.0)? {
            Some(bytes) if bytes.len() == 8 => {
                Ok(Some(u64::from_be_bytes(bytes.as_slice().try_into().unwrap())))
            }
            Some(_) => Err(StorageError::Inconsistent("bad height width".into())),
            None => Ok(None),
        }
    }

    pub fn block_hash_at(&self, height: u64) -> StorageResult<Hash> {
        self.storage
            .get(ColumnFamily::BlockHashByHeight, &height_key(height))?
            .and_then(|b| Hash::from_slice(&b))
            .ok_or_else(|| StorageError::NotFound(format!("block at height {}", height)))
    }

    pub fn block_blob_at(&self, height: u64) -> StorageResult<Vec<u8>> {
        let id = self.block_hash_at(height)?;
        self.block_blob_by_hash(&id)
    }

    pub fn block_blob_by_hash(&self, id: &Hash) -> StorageResult<Vec<u8>> {
        self.storage
            .get(ColumnFamily::Blocks, &id.0)?
            .ok_or_else(|| StorageError::NotFound(format!("block {}", id)))
    }

    pub fn block_by_hash(&self, id: &Hash) -> StorageResult<Block> {
        Ok(Block::from_blob(&self.block_blob_by_hash(id)?)?)
    }

    pub fn block_at(&self, height: u64) -> StorageResult<Block> {
        Ok(Block::from_blob(&self.block_blob_at(height)?)?)
    }

    pub fn top_block(&self) -> StorageResult<Block> {
        let height = self.height()?;
        if height == 0 {
            return Err(StorageError::NotFound("top block of empty chain".into()));
        }
        self.block_at(height - 1)
    }

    pub fn block_info(&self, height: u64) -> StorageResult<BlockInfoRecord> {
        let bytes = self
            .storage
            .get(ColumnFamily::BlockInfo, &height_key(height))?
            .ok_or_else(|| StorageError::NotFound(format!("block info at {}", height)))?;
        BlockInfoRecord::decode(&bytes)
    }

    pub fn cumulative_difficulty(&self, height: u64) -> StorageResult<Difficulty> {
        Ok(self.block_info(height)?.cumulative_difficulty)
    }

    pub fn already_generated_coins(&self, height: u64) -> StorageResult<u64> {
        Ok(self.block_info(height)?.already_generated_coins)
    }

    pub fn block_size(&self, height: u64) -> StorageResult<u64> {
        Ok(self.block_info(height)?.block_size)
    }

    pub fn block_timestamp(&self, height: u64) -> StorageResult<u64> {
        Ok(self.block_info(height)?.timestamp)
    }

    // ==================== Transactions ====================

    pub fn tx_exists(&self, id: &Hash) -> StorageResult<bool> {
        self.storage.contains(ColumnFamily::Txs, &id.0)
    }

    pub fn tx_blob(&self, id: &Hash) -> StorageResult<Option<Vec<u8>>> {
        self.storage.get(ColumnFamily::Txs, &id.0)
    }

    pub fn tx(&self, id: &Hash) -> StorageResult<Transaction> {
        let blob = self
            .tx_blob(id)?
            .ok_or_else(|| StorageError::NotFound(format!("tx {}", id)))?;
        Ok(Transaction::from_blob(&blob)?)
    }

    pub fn total_transactions(&self) -> StorageResult<u64> {
        self.get_meta_u64(META_TX_COUNT)
    }

    // ==================== Outputs & key images ====================

    pub fn num_outputs(&self, amount: u64) -> StorageResult<u64> {
        match self
            .storage
            .get(ColumnFamily::OutputCounts, &amount.to_be_bytes())?
        {
            Some(bytes) if bytes.len() == 8 => {
                Ok(u64::from_be_bytes(bytes.as_slice().try_into().unwrap()))
            }
            Some(_) => Err(StorageError::Inconsistent("bad output count width".into())),
            None => Ok(0),
        }
    }

    pub fn output(&self, amount: u64, index: u64) -> StorageResult<OutputRecord> {
        let bytes = self
            .storage
            .get(ColumnFamily::Outputs, &output_key(amount, index))?
            .ok_or_else(|| {
                StorageError::NotFound(format!("output ({}, {})", amount, index))
            })?;
        OutputRecord::decode(&bytes)
    }

    /// Bulk fetch of output records for one amount. Fails if any index is
    /// absent, which callers treat as a validation failure.
    pub fn output_keys(&self, amount: u64, indexes: &[u64]) -> StorageResult<Vec<OutputRecord>> {
        let keys: Vec<[u8; 16]> = indexes.iter().map(|i| output_key(amount, *i)).collect();
        let key_refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        let values = self.storage.multi_get(ColumnFamily::Outputs, &key_refs)?;
        indexes
            .iter()
            .zip(values)
            .map(|(i, v)| match v {
                Some(bytes) => OutputRecord::decode(&bytes),
                None => Err(StorageError::NotFound(format!("output ({}, {})", amount, i))),
            })
            .collect()
    }

    /// Total (and here: also unlocked) output counts for the requested
    /// amounts.
    pub fn output_histogram(&self, amounts: &[u64]) -> StorageResult<Vec<(u64, u64)>> {
        amounts
            .iter()
            .map(|a| Ok((*a, self.num_outputs(*a)?)))
            .collect()
    }

    pub fn has_key_image(&self, key_image: &KeyImage) -> StorageResult<bool> {
        self.storage.contains(ColumnFamily::KeyImages, &key_image.0)
    }

    /// Every committed key image, for audit/determinism checks.
    pub fn all_key_images(&self) -> StorageResult<Vec<KeyImage>> {
        Ok(self
            .storage
            .iter(ColumnFamily::KeyImages)?
            .filter_map(|(k, _)| {
                let mut arr = [0u8; 32];
                if k.len() == 32 {
                    arr.copy_from_slice(&k);
                    Some(KeyImage(arr))
                } else {
                    None
                }
            })
            .collect())
    }

    // ==================== Batch bracketing ====================

    /// Reserve exclusive batch-ingest access. Returns false if another
    /// batch is active; the caller backs off and retries.
    pub fn batch_start(&self) -> bool {
        self.batch_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release batch-ingest access.
    pub fn batch_stop(&self) {
        self.batch_active.store(false, Ordering::Release);
    }

    /// Flush pending writes to durable storage.
    pub fn sync(&self) -> StorageResult<()> {
        self.storage.sync()
    }

    // ==================== Append / pop ====================

    /// Append a block atomically: block blob, transactions, output-index
    /// entries, key images, metadata. Returns the new chain height.
    ///
    /// `txs` must be the block's listed transactions in `tx_hashes` order.
    /// A key image already present (in the store or twice within this
    /// block) raises [`StorageError::KeyImageExists`] before anything is
    /// written.
    #[instrument(skip_all, fields(height = block.height(), id = %block.hash()))]
    pub fn append_block(
        &self,
        block: &Block,
        block_size: u64,
        cumulative_difficulty: Difficulty,
        already_generated_coins: u64,
        txs: &[Transaction],
    ) -> StorageResult<u64> {
        let height = self.height()?;
        let id = block.hash();

        if height > 0 {
            let top = self.top_block_hash()?.ok_or_else(|| {
                StorageError::Inconsistent("non-empty chain without top hash".into())
            })?;
            if block.header.prev_id != top {
                return Err(StorageError::Inconsistent(format!(
                    "block {} does not extend top {}",
                    id, top
                )));
            }
        }
        if txs.len() != block.tx_hashes.len() {
            return Err(StorageError::Inconsistent(format!(
                "block lists {} txs, got {}",
                block.tx_hashes.len(),
                txs.len()
            )));
        }

        let mut batch = WriteBatch::with_capacity(16 + txs.len() * 8);
        batch.put(ColumnFamily::Blocks, id.0.to_vec(), block.blob());
        batch.put(
            ColumnFamily::BlockHashByHeight,
            height_key(height).to_vec(),
            id.0.to_vec(),
        );
        batch.put(
            ColumnFamily::BlockHeightByHash,
            id.0.to_vec(),
            height_key(height).to_vec(),
        );
        batch.put(
            ColumnFamily::BlockInfo,
            height_key(height).to_vec(),
            BlockInfoRecord {
                block_size,
                timestamp: block.header.timestamp,
                cumulative_difficulty,
                already_generated_coins,
            }
            .encode(),
        );

        // Running per-amount output counters for this batch.
        let mut counts: HashMap<u64, u64> = HashMap::new();
        let mut images_this_block: Vec<KeyImage> = Vec::new();

        for (pos, tx) in std::iter::once(&block.miner_tx).chain(txs.iter()).enumerate() {
            let tx_id = tx.hash();
            if pos > 0 && tx_id != block.tx_hashes[pos - 1] {
                return Err(StorageError::Inconsistent(format!(
                    "tx order mismatch at position {}",
                    pos - 1
                )));
            }

            batch.put(ColumnFamily::Txs, tx_id.0.to_vec(), tx.blob());
            let mut meta = ByteWriter::with_capacity(16);
            meta.put_u64(height);
            meta.put_u64(tx.unlock_time);
            batch.put(ColumnFamily::TxMeta, tx_id.0.to_vec(), meta.into_bytes());

            for key_image in tx.key_images() {
                if self.has_key_image(key_image)? || images_this_block.contains(key_image) {
                    return Err(StorageError::KeyImageExists(key_image.to_string()));
                }
                images_this_block.push(*key_image);
                batch.put(ColumnFamily::KeyImages, key_image.0.to_vec(), Vec::new());
            }

            for vout_index in 0..tx.vout.len() {
                let (amount, commitment) = output_slot(tx, vout_index)?;
                let next = match counts.get(&amount) {
                    Some(n) => *n,
                    None => self.num_outputs(amount)?,
                };
                let record = OutputRecord {
                    key: tx.vout[vout_index].target,
                    commitment,
                    origin_tx: tx_id,
                    unlock_time: tx.unlock_time,
                    height,
                };
                batch.put(
                    ColumnFamily::Outputs,
                    output_key(amount, next).to_vec(),
                    record.encode(),
                );
                counts.insert(amount, next + 1);
            }
        }

        for (amount, count) in &counts {
            batch.put(
                ColumnFamily::OutputCounts,
                amount.to_be_bytes().to_vec(),
                count.to_be_bytes().to_vec(),
            );
        }

        let new_height = height + 1;
        batch.put(
            ColumnFamily::Metadata,
            META_CHAIN_HEIGHT.to_vec(),
            new_height.to_be_bytes().to_vec(),
        );
        batch.put(
            ColumnFamily::Metadata,
            META_TOP_BLOCK_HASH.to_vec(),
            id.0.to_vec(),
        );
        let tx_count = self.total_transactions()? + 1 + txs.len() as u64;
        batch.put(
            ColumnFamily::Metadata,
            META_TX_COUNT.to_vec(),
            tx_count.to_be_bytes().to_vec(),
        );

        self.storage.write_batch(batch)?;
        debug!(new_height, "Block appended");
        Ok(new_height)
    }

    /// Remove the top block, undoing every contribution of `append_block`
    /// in reverse. Returns the block and its non-coinbase transactions.
    #[instrument(skip(self))]
    pub fn pop_block(&self) -> StorageResult<(Block, Vec<Transaction>)> {
        let height = self.height()?;
        if height == 0 {
            return Err(StorageError::NotFound("pop on empty chain".into()));
        }
        let top_height = height - 1;
        let id = self.block_hash_at(top_height)?;
        let block = self.block_by_hash(&id)?;
        let txs: Vec<Transaction> = block
            .tx_hashes
            .iter()
            .map(|h| self.tx(h))
            .collect::<StorageResult<_>>()?;

        let mut batch = WriteBatch::with_capacity(16 + txs.len() * 8);
        batch.delete(ColumnFamily::Blocks, id.0.to_vec());
        batch.delete(ColumnFamily::BlockHashByHeight, height_key(top_height).to_vec());
        batch.delete(ColumnFamily::BlockHeightByHash, id.0.to_vec());
        batch.delete(ColumnFamily::BlockInfo, height_key(top_height).to_vec());

        // How many outputs this block added per amount; they are the tail
        // of each per-amount sequence.
        let mut removed: HashMap<u64, u64> = HashMap::new();
        for tx in std::iter::once(&block.miner_tx).chain(txs.iter()) {
            let tx_id = tx.hash();
            batch.delete(ColumnFamily::Txs, tx_id.0.to_vec());
            batch.delete(ColumnFamily::TxMeta, tx_id.0.to_vec());
            for key_image in tx.key_images() {
                batch.delete(ColumnFamily::KeyImages, key_image.0.to_vec());
            }
            for vout_index in 0..tx.vout.len() {
                let (amount, _) = output_slot(tx, vout_index)?;
                *removed.entry(amount).or_insert(0) += 1;
            }
        }
        for (amount, count) in &removed {
            let stored = self.num_outputs(*amount)?;
            if stored < *count {
                return Err(StorageError::Inconsistent(format!(
                    "output count underflow for amount {}",
                    amount
                )));
            }
            let remaining = stored - count;
            for index in remaining..stored {
                batch.delete(ColumnFamily::Outputs, output_key(*amount, index).to_vec());
            }
            batch.put(
                ColumnFamily::OutputCounts,
                amount.to_be_bytes().to_vec(),
                remaining.to_be_bytes().to_vec(),
            );
        }

        batch.put(
            ColumnFamily::Metadata,
            META_CHAIN_HEIGHT.to_vec(),
            top_height.to_be_bytes().to_vec(),
        );
        if top_height > 0 {
            let new_top = self.block_hash_at(top_height - 1)?;
            batch.put(
                ColumnFamily::Metadata,
                META_TOP_BLOCK_HASH.to_vec(),
                new_top.0.to_vec(),
            );
        } else {
            batch.delete(ColumnFamily::Metadata, META_TOP_BLOCK_HASH.to_vec());
        }
        let tx_count = self
            .total_transactions()?
            .saturating_sub(1 + txs.len() as u64);
        batch.put(
            ColumnFamily::Metadata,
            META_TX_COUNT.to_vec(),
            tx_count.to_be_bytes().to_vec(),
        );

        self.storage.write_batch(batch)?;
        debug!(new_height = top_height, "Block popped");
        Ok((block, txs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use umbra_types::{BlockHeader, RctSignature, TxIn, TxOut};

    fn coinbase(height: u64, amount: u64) -> Transaction {
        Transaction {
            version: 2,
            unlock_time: height + 60,
            vin: vec![TxIn::Gen { height }],
            vout: vec![TxOut {
                amount,
                target: PublicKey([height as u8 + 1; 32]),
            }],
            extra: Vec::new(),
            rct: RctSignature::default(),
        }
    }

    fn block(height: u64, prev_id: Hash) -> Block {
        Block {
            header: BlockHeader {
                major_version: 1,
                minor_version: 1,
                timestamp: 240 * height,
                prev_id,
                nonce: height as u32,
            },
            miner_tx: coinbase(height, 5000 + height),
            tx_hashes: Vec::new(),
        }
    }

    fn store() -> ChainStore {
        ChainStore::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_append_and_read_back() {
        let store = store();
        let b0 = block(0, Hash::ZERO);
        let h = store.append_block(&b0, 100, 1, 5000, &[]).unwrap();
        assert_eq!(h, 1);
        assert_eq!(store.height().unwrap(), 1);
        assert_eq!(store.top_block_hash().unwrap(), Some(b0.hash()));
        assert_eq!(store.block_at(0).unwrap(), b0);
        assert!(store.tx_exists(&b0.miner_tx.hash()).unwrap());
        assert_eq!(store.num_outputs(0).unwrap(), 1);
        assert_eq!(store.cumulative_difficulty(0).unwrap(), 1);
        assert_eq!(store.total_transactions().unwrap(), 1);
    }

    #[test]
    fn test_append_rejects_wrong_parent() {
        let store = store();
        let b0 = block(0, Hash::ZERO);
        store.append_block(&b0, 100, 1, 5000, &[]).unwrap();
        let stray = block(1, Hash([0xaa; 32]));
        assert!(matches!(
            store.append_block(&stray, 100, 2, 9000, &[]),
            Err(StorageError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_pop_restores_previous_state() {
        let store = store();
        let b0 = block(0, Hash::ZERO);
        store.append_block(&b0, 100, 1, 5000, &[]).unwrap();
        let b1 = block(1, b0.hash());
        store.append_block(&b1, 120, 2, 10_001, &[]).unwrap();

        let (popped, txs) = store.pop_block().unwrap();
        assert_eq!(popped, b1);
        assert!(txs.is_empty());
        assert_eq!(store.height().unwrap(), 1);
        assert_eq!(store.top_block_hash().unwrap(), Some(b0.hash()));
        assert_eq!(store.num_outputs(0).unwrap(), 1);
        assert!(!store.tx_exists(&b1.miner_tx.hash()).unwrap());
    }

    #[test]
    fn test_key_image_exists_detected_before_write() {
        let store = store();
        let b0 = block(0, Hash::ZERO);
        store.append_block(&b0, 100, 1, 5000, &[]).unwrap();

        let spend = Transaction {
            version: 2,
            unlock_time: 0,
            vin: vec![TxIn::ToKey {
                amount: 0,
                key_offsets: vec![0],
                key_image: KeyImage([3u8; 32]),
            }],
            vout: Vec::new(),
            extra: Vec::new(),
            rct: RctSignature {
                rct_type: umbra_types::RctType::Simple,
                fee: 1,
                ..Default::default()
            },
        };
        let mut b1 = block(1, b0.hash());
        b1.tx_hashes = vec![spend.hash()];
        store
            .append_block(&b1, 150, 2, 10_001, std::slice::from_ref(&spend))
            .unwrap();

        // Same key image again in the next block: rejected, nothing written.
        let mut b2 = block(2, b1.hash());
        let mut spend2 = spend.clone();
        spend2.unlock_time = 1;
        b2.tx_hashes = vec![spend2.hash()];
        let before = store.height().unwrap();
        assert!(matches!(
            store.append_block(&b2, 150, 3, 15_000, std::slice::from_ref(&spend2)),
            Err(StorageError::KeyImageExists(_))
        ));
        assert_eq!(store.height().unwrap(), before);
        assert!(!store.tx_exists(&spend2.hash()).unwrap());
    }

    #[test]
    fn test_batch_bracketing_is_exclusive() {
        let store = store();
        assert!(store.batch_start());
        assert!(!store.batch_start());
        store.batch_stop();
        assert!(store.batch_start());
        store.batch_stop();
    }
}
