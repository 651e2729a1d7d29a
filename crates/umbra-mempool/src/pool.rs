//! Transaction pool implementation.

use crate::{MempoolError, MempoolResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use umbra_ringct::KeyImage;
use umbra_types::{Hash, Transaction};

/// A pooled transaction with the metadata the core hands back and forth.
#[derive(Debug, Clone)]
pub struct PooledTransaction {
    pub tx: Transaction,
    pub blob_size: u64,
    pub fee: u64,
    pub relayed: bool,
    pub do_not_relay: bool,
    pub double_spend_seen: bool,
    /// Came out of a (possibly reorged-away) block rather than the relay
    /// network.
    pub kept_by_block: bool,
}

#[derive(Default)]
struct PoolInner {
    txs: HashMap<Hash, PooledTransaction>,
    /// Key image -> claiming tx, for pool-level double-spend detection.
    key_images: HashMap<KeyImage, Hash>,
}

/// The transaction pool.
#[derive(Default)]
pub struct TxPool {
    inner: Mutex<PoolInner>,
}

impl TxPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction. `kept_by_block` admits transactions returning
    /// from popped blocks even when they conflict with pooled spends (the
    /// conflict is recorded, not rejected).
    pub fn add_tx(
        &self,
        tx: Transaction,
        kept_by_block: bool,
        relayed: bool,
        do_not_relay: bool,
    ) -> MempoolResult<()> {
        let id = tx.hash();
        let blob_size = tx.blob_size() as u64;
        let fee = tx.fee();
        let mut inner = self.inner.lock();

        if inner.txs.contains_key(&id) {
            return Err(MempoolError::AlreadyExists(id.to_string()));
        }

        let mut double_spend_seen = false;
        for key_image in tx.key_images() {
            if let Some(claimed_by) = inner.key_images.get(key_image) {
                if !kept_by_block {
                    return Err(MempoolError::DoubleSpend(format!(
                        "{} claimed by {}",
                        key_image, claimed_by
                    )));
                }
                warn!(%id, %key_image, "Pool double spend on kept-by-block tx");
                double_spend_seen = true;
            }
        }
        if !double_spend_seen {
            for key_image in tx.key_images() {
                inner.key_images.insert(*key_image, id);
            }
        }

        inner.txs.insert(
            id,
            PooledTransaction {
                tx,
                blob_size,
                fee,
                relayed,
                do_not_relay,
                double_spend_seen,
                kept_by_block,
            },
        );
        debug!(%id, count = inner.txs.len(), "Transaction added to pool");
        Ok(())
    }

    /// Remove and return a transaction, releasing its key-image claims.
    pub fn take_tx(&self, id: &Hash) -> Option<PooledTransaction> {
        let mut inner = self.inner.lock();
        let entry = inner.txs.remove(id)?;
        if !entry.double_spend_seen {
            for key_image in entry.tx.key_images() {
                if inner.key_images.get(key_image) == Some(id) {
                    inner.key_images.remove(key_image);
                }
            }
        }
        Some(entry)
    }

    pub fn have_tx(&self, id: &Hash) -> bool {
        self.inner.lock().txs.contains_key(id)
    }

    /// Whether a key image is claimed by any pooled transaction.
    pub fn have_key_image(&self, key_image: &KeyImage) -> bool {
        self.inner.lock().key_images.contains_key(key_image)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().txs.is_empty()
    }

    pub fn get_transactions(&self) -> Vec<Transaction> {
        self.inner
            .lock()
            .txs
            .values()
            .map(|e| e.tx.clone())
            .collect()
    }

    /// Chain grew: nothing to relocate, just noted.
    pub fn on_blockchain_inc(&self, height: u64, top_id: &Hash) {
        debug!(height, %top_id, "Pool notified of chain growth");
    }

    /// Chain shrank (reorg/pop); pooled txs may reference rewound outputs
    /// and get re-validated on their next block inclusion.
    pub fn on_blockchain_dec(&self, height: u64, top_id: &Hash) {
        info!(height, %top_id, "Pool notified of chain rewind");
    }

    /// Pick transactions for a block template, greedily by fee rate, up to
    /// `max_total_size` of cumulative blob size. Returns the chosen hashes
    /// plus their total size and fee.
    pub fn fill_block_template(&self, max_total_size: u64) -> (Vec<Hash>, u64, u64) {
        let inner = self.inner.lock();
        let mut candidates: Vec<&PooledTransaction> = inner
            .txs
            .values()
            .filter(|e| !e.do_not_relay && !e.double_spend_seen)
            .collect();
        candidates.sort_by(|a, b| {
            let rate_a = a.fee as u128 * b.blob_size as u128;
            let rate_b = b.fee as u128 * a.blob_size as u128;
            rate_b.cmp(&rate_a).then_with(|| a.tx.hash().cmp(&b.tx.hash()))
        });

        let mut hashes = Vec::new();
        let mut total_size = 0u64;
        let mut total_fee = 0u64;
        for entry in candidates {
            if total_size + entry.blob_size > max_total_size {
                continue;
            }
            total_size += entry.blob_size;
            total_fee += entry.fee;
            hashes.push(entry.tx.hash());
        }
        (hashes, total_size, total_fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_types::{RctSignature, RctType, TxIn};

    fn tx(image: u8, fee: u64) -> Transaction {
        Transaction {
            version: 2,
            unlock_time: 0,
            vin: vec![TxIn::ToKey {
                amount: 0,
                key_offsets: vec![1, 2, 3],
                key_image: KeyImage([image; 32]),
            }],
            vout: Vec::new(),
            extra: Vec::new(),
            rct: RctSignature {
                rct_type: RctType::Simple,
                fee,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_add_take_roundtrip() {
        let pool = TxPool::new();
        let t = tx(1, 500);
        let id = t.hash();
        pool.add_tx(t, false, true, false).unwrap();
        assert!(pool.have_tx(&id));
        assert!(pool.have_key_image(&KeyImage([1; 32])));

        let taken = pool.take_tx(&id).unwrap();
        assert_eq!(taken.fee, 500);
        assert!(!pool.have_tx(&id));
        assert!(!pool.have_key_image(&KeyImage([1; 32])));
        assert!(pool.take_tx(&id).is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let pool = TxPool::new();
        let t = tx(1, 500);
        pool.add_tx(t.clone(), false, true, false).unwrap();
        assert!(matches!(
            pool.add_tx(t, false, true, false),
            Err(MempoolError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_pool_double_spend() {
        let pool = TxPool::new();
        pool.add_tx(tx(7, 500), false, true, false).unwrap();

        let mut conflict = tx(7, 900);
        conflict.unlock_time = 1;
        assert!(matches!(
            pool.add_tx(conflict.clone(), false, true, false),
            Err(MempoolError::DoubleSpend(_))
        ));

        // Kept-by-block conflicts are admitted but flagged.
        pool.add_tx(conflict.clone(), true, true, false).unwrap();
        let taken = pool.take_tx(&conflict.hash()).unwrap();
        assert!(taken.double_spend_seen);
    }

    #[test]
    fn test_fill_block_template_orders_by_fee_rate() {
        let pool = TxPool::new();
        pool.add_tx(tx(1, 100), false, true, false).unwrap();
        pool.add_tx(tx(2, 900), false, true, false).unwrap();
        pool.add_tx(tx(3, 500), false, true, false).unwrap();

        let (hashes, size, fee) = pool.fill_block_template(u64::MAX);
        assert_eq!(hashes.len(), 3);
        assert_eq!(fee, 1500);
        assert!(size > 0);
        // Highest fee (same sizes) first.
        assert_eq!(hashes[0], tx(2, 900).hash());

        // A tight size cap limits the selection.
        let one_size = tx(1, 100).blob_size() as u64;
        let (hashes, _, fee) = pool.fill_block_template(one_size);
        assert_eq!(hashes.len(), 1);
        assert_eq!(fee, 900);
    }
}
