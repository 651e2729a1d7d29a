//! Chain-supplement queries serving syncing peers.

use crate::chain::Blockchain;
use crate::ChainResult;
use tracing::{debug, warn};
use umbra_consensus::params;
use umbra_storage::StorageError;
use umbra_types::{Block, Hash, Transaction};

impl Blockchain {
    /// Block ids for a sync handshake: dense near the tip, exponentially
    /// sparse back to genesis, genesis always included.
    pub fn get_short_chain_history(&self) -> ChainResult<Vec<Hash>> {
        let height = self.store.height()?;
        let mut ids = Vec::new();
        if height == 0 {
            return Ok(ids);
        }

        let mut i = 0u64;
        let mut current_multiplier = 1u64;
        let mut current_back_offset = 1u64;
        let mut genesis_included = false;
        while current_back_offset < height {
            ids.push(self.store.block_hash_at(height - current_back_offset)?);
            if height - current_back_offset == 0 {
                genesis_included = true;
            }
            if i < 10 {
                current_back_offset += 1;
            } else {
                current_multiplier *= 2;
                current_back_offset += current_multiplier;
            }
            i += 1;
        }
        if !genesis_included {
            ids.push(self.store.block_hash_at(0)?);
        }
        Ok(ids)
    }

    /// Find the split point against a peer's short history (most recent
    /// first, genesis last). `None` if the histories don't share genesis.
    pub fn find_blockchain_supplement(&self, qblock_ids: &[Hash]) -> ChainResult<Option<u64>> {
        if qblock_ids.is_empty() {
            warn!("Peer sent an empty short chain history");
            return Ok(None);
        }
        let genesis = self.store.block_hash_at(0)?;
        if qblock_ids.last() != Some(&genesis) {
            warn!("Peer short chain history has a different genesis block");
            return Ok(None);
        }

        for id in qblock_ids {
            if let Some(height) = self.store.block_height(id)? {
                // Start from the last id both sides know.
                return Ok(Some(height));
            }
        }
        // Impossible once genesis matched, but don't trust peers.
        warn!("Can't find split point with peer");
        Ok(None)
    }

    /// Split point plus up to the default id budget of more recent block
    /// hashes, and the current height.
    pub fn find_blockchain_supplement_hashes(
        &self,
        qblock_ids: &[Hash],
    ) -> ChainResult<Option<(Vec<Hash>, u64, u64)>> {
        let Some(start_height) = self.find_blockchain_supplement(qblock_ids)? else {
            return Ok(None);
        };
        let current_height = self.store.height()?;
        let mut hashes = Vec::new();
        let mut h = start_height;
        while h < current_height && hashes.len() < params::BLOCK_IDS_SYNCHRONIZING_DEFAULT_COUNT {
            hashes.push(self.store.block_hash_at(h)?);
            h += 1;
        }
        Ok(Some((hashes, start_height, current_height)))
    }

    /// Split point plus full blocks (with their transaction blobs), capped
    /// by `max_count` and the response byte budget, but always at least
    /// three blocks.
    #[allow(clippy::type_complexity)]
    pub fn find_blockchain_supplement_full(
        &self,
        req_start_block: u64,
        qblock_ids: &[Hash],
        max_count: usize,
    ) -> ChainResult<Option<(Vec<(Vec<u8>, Vec<Vec<u8>>)>, u64, u64)>> {
        let start_height = if req_start_block > 0 {
            if req_start_block >= self.store.height()? {
                return Ok(None);
            }
            req_start_block
        } else {
            match self.find_blockchain_supplement(qblock_ids)? {
                Some(height) => height,
                None => return Ok(None),
            }
        };

        let total_height = self.store.height()?;
        let mut blocks = Vec::new();
        let mut size = 0usize;
        let mut h = start_height;
        while h < total_height
            && blocks.len() < max_count
            && (size < params::FIND_BLOCKCHAIN_SUPPLEMENT_MAX_SIZE || blocks.len() < 3)
        {
            let block_blob = self.store.block_blob_at(h)?;
            let block = Block::from_blob(&block_blob)?;
            let (tx_blobs, missed) = self.get_transactions_blobs(&block.tx_hashes)?;
            if !missed.is_empty() {
                return Err(StorageError::Inconsistent(format!(
                    "transactions of block {} not found",
                    h
                ))
                .into());
            }
            size += block_blob.len() + tx_blobs.iter().map(|t| t.len()).sum::<usize>();
            blocks.push((block_blob, tx_blobs));
            h += 1;
        }
        debug!(
            start_height,
            count = blocks.len(),
            size,
            "Built blockchain supplement"
        );
        Ok(Some((blocks, total_height, start_height)))
    }

    /// Serve a peer's object request: named blocks with their txs, plus
    /// named loose transactions; ids we don't have are reported back.
    #[allow(clippy::type_complexity)]
    pub fn handle_get_objects(
        &self,
        block_ids: &[Hash],
        tx_ids: &[Hash],
    ) -> ChainResult<(
        Vec<(Vec<u8>, Vec<Vec<u8>>)>,
        Vec<Hash>,
        Vec<Vec<u8>>,
        Vec<Hash>,
    )> {
        let mut blocks = Vec::new();
        let mut missed_blocks = Vec::new();
        for id in block_ids {
            if !self.store.block_exists(id)? {
                missed_blocks.push(*id);
                continue;
            }
            let blob = self.store.block_blob_by_hash(id)?;
            let block = Block::from_blob(&blob)?;
            let (tx_blobs, missed_txs) = self.get_transactions_blobs(&block.tx_hashes)?;
            if !missed_txs.is_empty() {
                missed_blocks.push(*id);
                continue;
            }
            blocks.push((blob, tx_blobs));
        }

        let (txs, missed_txs) = self.get_transactions_blobs(tx_ids)?;
        Ok((blocks, missed_blocks, txs, missed_txs))
    }

    /// Consecutive blocks with their transactions, by height range.
    pub fn get_blocks(
        &self,
        start_offset: u64,
        count: usize,
    ) -> ChainResult<Option<Vec<(Vec<u8>, Block)>>> {
        let height = self.store.height()?;
        if start_offset >= height {
            return Ok(None);
        }
        let end = height.min(start_offset + count as u64);
        let mut blocks = Vec::with_capacity((end - start_offset) as usize);
        for h in start_offset..end {
            let blob = self.store.block_blob_at(h)?;
            let block = Block::from_blob(&blob)?;
            blocks.push((blob, block));
        }
        Ok(Some(blocks))
    }

    /// Transaction blobs by id; misses are returned, not errors.
    pub fn get_transactions_blobs(
        &self,
        tx_ids: &[Hash],
    ) -> ChainResult<(Vec<Vec<u8>>, Vec<Hash>)> {
        let mut found = Vec::new();
        let mut missed = Vec::new();
        for id in tx_ids {
            match self.store.tx_blob(id)? {
                Some(blob) => found.push(blob),
                None => missed.push(*id),
            }
        }
        Ok((found, missed))
    }

    /// Parsed transactions by id.
    pub fn get_transactions(
        &self,
        tx_ids: &[Hash],
    ) -> ChainResult<(Vec<Transaction>, Vec<Hash>)> {
        let (blobs, missed) = self.get_transactions_blobs(tx_ids)?;
        let mut txs = Vec::with_capacity(blobs.len());
        for blob in blobs {
            txs.push(Transaction::from_blob(&blob)?);
        }
        Ok((txs, missed))
    }

    /// A block by hash, looking through the main chain and then the
    /// alternate index. The second return marks an alternate ("orphaned")
    /// block.
    pub fn get_block_by_hash(&self, id: &Hash) -> ChainResult<Option<(Block, bool)>> {
        if self.store.block_exists(id)? {
            return Ok(Some((self.store.block_by_hash(id)?, false)));
        }
        let inner = self.inner.lock();
        Ok(inner
            .alternative_chains
            .get(id)
            .map(|entry| (entry.block.clone(), true)))
    }

    /// Per-amount totals over the output index.
    pub fn get_output_histogram(&self, amounts: &[u64]) -> ChainResult<Vec<(u64, u64)>> {
        Ok(self.store.output_histogram(amounts)?)
    }
}
