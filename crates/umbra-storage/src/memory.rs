//! In-memory storage backend for tests.

use crate::{ColumnFamily, Storage, StorageResult, WriteBatch};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// A `Storage` implementation over plain maps. Batches apply atomically
/// under one write lock, mirroring the durability grain of the RocksDB
/// backend (minus the durability).
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<&'static str, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStore {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .tables
            .read()
            .get(cf.name())
            .and_then(|t| t.get(key).cloned()))
    }

    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.tables
            .write()
            .entry(cf.name())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()> {
        if let Some(table) = self.tables.write().get_mut(cf.name()) {
            table.remove(key);
        }
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut tables = self.tables.write();
        for op in batch.operations {
            let table = tables.entry(op.cf.name()).or_default();
            match op.kind {
                crate::batch::OperationKind::Put { value } => {
                    table.insert(op.key, value);
                }
                crate::batch::OperationKind::Delete => {
                    table.remove(&op.key);
                }
            }
        }
        Ok(())
    }

    fn iter(
        &self,
        cf: ColumnFamily,
    ) -> StorageResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>> {
        let collected: Vec<_> = self
            .tables
            .read()
            .get(cf.name())
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Ok(Box::new(collected.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_basic_ops() {
        let store = MemoryStore::new();
        store.put(ColumnFamily::Metadata, b"a", b"1").unwrap();
        assert_eq!(
            store.get(ColumnFamily::Metadata, b"a").unwrap(),
            Some(b"1".to_vec())
        );
        assert!(store.contains(ColumnFamily::Metadata, b"a").unwrap());

        store.delete(ColumnFamily::Metadata, b"a").unwrap();
        assert_eq!(store.get(ColumnFamily::Metadata, b"a").unwrap(), None);
    }

    #[test]
    fn test_memory_store_batch_and_iter() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(ColumnFamily::Txs, b"b".to_vec(), b"2".to_vec());
        batch.put(ColumnFamily::Txs, b"a".to_vec(), b"1".to_vec());
        store.write_batch(batch).unwrap();

        let entries: Vec<_> = store.iter(ColumnFamily::Txs).unwrap().collect();
        assert_eq!(entries.len(), 2);
        // BTreeMap iteration is key-ordered.
        assert_eq!(entries[0].0, b"a".to_vec());
    }
}
