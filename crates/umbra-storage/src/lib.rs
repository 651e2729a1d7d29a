//! # umbra-storage
//!
//! Storage layer for the Umbra node.
//!
//! This crate provides a RocksDB-based storage abstraction and the typed
//! chain-store facade built on top of it:
//! - Column families for different data types (blocks, transactions,
//!   outputs, key images, metadata)
//! - Atomic batch writes; an appended or popped block is one batch
//! - An in-memory backend for tests
//!
//! ## Column Families
//!
//! - `Blocks`: block blobs indexed by block id
//! - `BlockHashByHeight`: main-chain index (height -> block id)
//! - `BlockHeightByHash`: inverse main-chain index
//! - `BlockInfo`: per-height metadata (size, timestamp, cumulative
//!   difficulty, generated coins)
//! - `Txs` / `TxMeta`: transaction blobs and their chain placement
//! - `Outputs` / `OutputCounts`: the append-only per-amount output index
//! - `KeyImages`: the spent-output tag set
//! - `Metadata`: chain height, top hash, hard-fork vote state

mod batch;
mod chain_store;
mod database;
mod error;
mod memory;

pub use batch::WriteBatch;
pub use chain_store::{BlockInfoRecord, ChainStore, OutputRecord};
pub use database::{ColumnFamily, Database};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;

/// Storage trait for abstracting database operations.
///
/// This allows for easy testing with mock implementations.
pub trait Storage: Send + Sync {
    /// Get a value by key from a column family.
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Put a key-value pair into a column family.
    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Delete a key from a column family.
    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()>;

    /// Check if a key exists in a column family.
    fn contains(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(cf, key)?.is_some())
    }

    /// Execute a batch of writes atomically.
    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Create an iterator over a column family.
    fn iter(&self, cf: ColumnFamily)
        -> StorageResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>>;

    /// Get multiple values by keys from a column family.
    fn multi_get(&self, cf: ColumnFamily, keys: &[&[u8]]) -> StorageResult<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(cf, k)).collect()
    }

    /// Flush pending writes to durable storage.
    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
}
