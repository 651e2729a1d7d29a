//! Blocks and block-extended metadata.

use crate::codec::{ByteReader, ByteWriter, CodecResult};
use crate::hash::{fast_hash, tree_hash, Hash};
use crate::transaction::{Transaction, TxIn};
use crate::Difficulty;

/// Block header fields covered by the block id and the proof of work.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockHeader {
    /// Consensus rule-set version the block claims.
    pub major_version: u8,
    /// Miner vote for a future rule-set version.
    pub minor_version: u8,
    /// Unix timestamp, seconds.
    pub timestamp: u64,
    /// Hash of the previous block.
    pub prev_id: Hash,
    /// PoW nonce.
    pub nonce: u32,
}

/// A block: header, coinbase transaction, and the hashes of the
/// transactions it carries. Immutable once committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub miner_tx: Transaction,
    pub tx_hashes: Vec<Hash>,
}

impl Block {
    /// Height claimed by the coinbase input; zero if the coinbase is
    /// malformed (the verifier rejects that separately).
    pub fn height(&self) -> u64 {
        match self.miner_tx.vin.first() {
            Some(TxIn::Gen { height }) => *height,
            _ => 0,
        }
    }

    fn encode_header(&self, w: &mut ByteWriter) {
        w.put_u8(self.header.major_version);
        w.put_u8(self.header.minor_version);
        w.put_u64(self.header.timestamp);
        w.put_hash(&self.header.prev_id);
        w.put_u32(self.header.nonce);
    }

    /// The blob both the block id and the proof of work are computed over:
    /// header fields, the transaction merkle root, and the transaction
    /// count (coinbase included).
    pub fn hashing_blob(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(96);
        self.encode_header(&mut w);
        let mut hashes = Vec::with_capacity(1 + self.tx_hashes.len());
        hashes.push(self.miner_tx.hash());
        hashes.extend_from_slice(&self.tx_hashes);
        w.put_hash(&tree_hash(&hashes));
        w.put_u32(hashes.len() as u32);
        w.into_bytes()
    }

    /// The block id.
    pub fn hash(&self) -> Hash {
        fast_hash(&self.hashing_blob())
    }

    /// Serialize the full block.
    pub fn blob(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(512);
        self.encode_header(&mut w);
        w.put_var_bytes(&self.miner_tx.blob());
        w.put_u32(self.tx_hashes.len() as u32);
        for h in &self.tx_hashes {
            w.put_hash(h);
        }
        w.into_bytes()
    }

    /// Deserialize a full block blob.
    pub fn from_blob(blob: &[u8]) -> CodecResult<Self> {
        let mut r = ByteReader::new(blob);
        let major_version = r.get_u8()?;
        let minor_version = r.get_u8()?;
        let timestamp = r.get_u64()?;
        let prev_id = r.get_hash()?;
        let nonce = r.get_u32()?;
        let miner_blob = r.get_var_bytes()?;
        let miner_tx = Transaction::from_blob(&miner_blob)?;
        let count = r.get_len()?;
        let mut tx_hashes = Vec::with_capacity(count);
        for _ in 0..count {
            tx_hashes.push(r.get_hash()?);
        }
        r.finish()?;
        Ok(Self {
            header: BlockHeader {
                major_version,
                minor_version,
                timestamp,
                prev_id,
                nonce,
            },
            miner_tx,
            tx_hashes,
        })
    }

    /// Serialized size in bytes.
    pub fn blob_size(&self) -> usize {
        self.blob().len()
    }
}

/// A block plus the chain metadata tracked for every main-chain and
/// alternate-chain block.
#[derive(Debug, Clone)]
pub struct BlockExtendedInfo {
    pub block: Block,
    pub height: u64,
    pub cumulative_difficulty: Difficulty,
    pub already_generated_coins: u64,
    /// Serialized size of the block plus its transactions.
    pub block_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::RctSignature;

    fn sample_block() -> Block {
        Block {
            header: BlockHeader {
                major_version: 1,
                minor_version: 1,
                timestamp: 1_000_000,
                prev_id: Hash([7u8; 32]),
                nonce: 42,
            },
            miner_tx: Transaction {
                version: 2,
                unlock_time: 64,
                vin: vec![TxIn::Gen { height: 4 }],
                vout: Vec::new(),
                extra: Vec::new(),
                rct: RctSignature::default(),
            },
            tx_hashes: vec![Hash([1u8; 32]), Hash([2u8; 32])],
        }
    }

    #[test]
    fn test_blob_roundtrip() {
        let block = sample_block();
        let decoded = Block::from_blob(&block.blob()).unwrap();
        assert_eq!(block, decoded);
        assert_eq!(block.hash(), decoded.hash());
    }

    #[test]
    fn test_height_from_coinbase() {
        assert_eq!(sample_block().height(), 4);
    }

    #[test]
    fn test_id_depends_on_nonce_and_txs() {
        let block = sample_block();
        let mut other = block.clone();
        other.header.nonce += 1;
        assert_ne!(block.hash(), other.hash());

        let mut other = block.clone();
        other.tx_hashes.pop();
        assert_ne!(block.hash(), other.hash());
    }
}
