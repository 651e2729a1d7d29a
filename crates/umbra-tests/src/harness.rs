//! Chain harness over the in-memory store.
//!
//! Blocks are forged with controlled timestamps (genesis-relative, target
//! spacing) so median and difficulty behavior is deterministic; nonces are
//! ground until the proof of work clears the expected difficulty.

use rand::rngs::OsRng;
use std::sync::Arc;
use umbra_chain::{Blockchain, ChainConfig, SyncMode};
use umbra_consensus::{
    check_hash, construct_miner_tx, get_block_longhash, params, AccountAddress, Feature,
    ForkEntry, HardFork, NetworkConfig,
};
use umbra_mempool::TxPool;
use umbra_ringct::KeyPair;
use umbra_storage::{ChainStore, MemoryStore};
use umbra_types::{Block, BlockHeader, BlockVerificationContext, Difficulty, Hash, Transaction};

/// A wallet-side account for tests.
pub struct TestAccount {
    pub spend: KeyPair,
    pub view: KeyPair,
}

impl TestAccount {
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self {
            spend: KeyPair::generate(&mut rng),
            view: KeyPair::generate(&mut rng),
        }
    }

    pub fn address(&self) -> AccountAddress {
        AccountAddress {
            spend_public: self.spend.public,
            view_public: self.view.public,
        }
    }
}

/// A version-1-only fork table for the fake network.
pub fn v1_fork_table() -> Vec<ForkEntry> {
    vec![ForkEntry {
        version: 1,
        height: 0,
        threshold: 0,
        time: 0,
    }]
}

/// A ladder activating every version up to `max_version`, one block apart
/// (version v activates at height v - 1).
pub fn fork_table_to(max_version: u8) -> Vec<ForkEntry> {
    (1..=max_version)
        .map(|v| ForkEntry {
            version: v,
            height: (v as u64) - 1,
            threshold: 0,
            time: 0,
        })
        .collect()
}

/// A blockchain over the in-memory store, plus the miner account every
/// forged coinbase pays.
pub struct TestChain {
    pub chain: Blockchain,
    pub account: TestAccount,
    pub network: NetworkConfig,
    /// Mirror of the chain's fork schedule, for forging version-correct
    /// blocks.
    pub forks: HardFork,
}

impl TestChain {
    pub fn new() -> Self {
        Self::with_fork_table(v1_fork_table())
    }

    pub fn with_fork_table(fork_table: Vec<ForkEntry>) -> Self {
        let network = NetworkConfig::fake(fork_table.clone());
        let store = Arc::new(ChainStore::new(Arc::new(MemoryStore::new())));
        let pool = Arc::new(TxPool::new());
        let mut config = ChainConfig::new(network.clone());
        config.sync_mode = SyncMode::NoSync;
        config.blocks_per_sync = 0;
        let chain = Blockchain::new(store, pool, config).expect("chain init");
        Self {
            chain,
            account: TestAccount::generate(),
            network,
            forks: HardFork::new(fork_table).expect("fork table"),
        }
    }

    pub fn store(&self) -> &Arc<ChainStore> {
        self.chain.store()
    }

    pub fn height(&self) -> u64 {
        self.store().height().unwrap()
    }

    pub fn top_hash(&self) -> Hash {
        self.chain.get_tail_id().unwrap()
    }

    /// Timestamp one target interval past the current top block.
    pub fn next_timestamp(&self) -> u64 {
        let height = self.height();
        if height == 0 {
            return self.network.genesis_timestamp;
        }
        self.store().block_timestamp(height - 1).unwrap() + params::DIFFICULTY_TARGET
    }

    /// Grind the nonce until the PoW clears `difficulty`.
    pub fn mine_to(block: &mut Block, difficulty: Difficulty) {
        for nonce in 0..u32::MAX {
            block.header.nonce = nonce;
            if check_hash(&get_block_longhash(block), difficulty) {
                return;
            }
        }
        panic!("nonce space exhausted");
    }

    /// Build (and PoW-grind) a block on an arbitrary parent.
    ///
    /// `parent_generated` is the generated-coins counter at the parent;
    /// `difficulty` must be at least the difficulty the chain will demand
    /// of this block. Returns the block and the generated-coins counter
    /// after it.
    pub fn forge_block_on(
        &self,
        prev_id: Hash,
        height: u64,
        timestamp: u64,
        parent_generated: u64,
        txs: &[Transaction],
        difficulty: Difficulty,
    ) -> (Block, u64) {
        let fee: u64 = txs.iter().map(|t| t.fee()).sum();
        let base_reward =
            umbra_consensus::get_block_reward(0, 0, parent_generated, height).unwrap();
        let version = self.forks.version_at(height);
        let tx_version = if self.forks.check_feature(Feature::NeedV3Txes, height) {
            3
        } else {
            2
        };
        let dev_fund_active = self.forks.check_feature(Feature::DevFund, height);
        let miner_tx = construct_miner_tx(
            &self.network,
            height,
            0,
            parent_generated,
            0,
            fee,
            &self.account.address(),
            &[],
            tx_version,
            dev_fund_active,
            None,
        )
        .unwrap();
        let mut block = Block {
            header: BlockHeader {
                major_version: version,
                minor_version: version,
                timestamp,
                prev_id,
                nonce: 0,
            },
            miner_tx,
            tx_hashes: txs.iter().map(|t| t.hash()).collect(),
        };
        Self::mine_to(&mut block, difficulty);
        (block, parent_generated + base_reward)
    }

    /// Extend the main chain by one block carrying `txs` (which must
    /// already be in the pool). Panics unless the block is accepted.
    pub fn mine_block_with_txs(&self, txs: &[Transaction]) -> Block {
        let height = self.height();
        let parent_generated = if height > 0 {
            self.store().already_generated_coins(height - 1).unwrap()
        } else {
            0
        };
        let difficulty = self.chain.block_difficulty_for_next_block().unwrap();
        let (block, _) = self.forge_block_on(
            self.top_hash(),
            height,
            self.next_timestamp(),
            parent_generated,
            txs,
            difficulty,
        );
        let bvc = self.chain.add_new_block(block.clone()).unwrap();
        assert!(
            bvc.added_to_main_chain,
            "forged block rejected: {:?} at height {}",
            bvc, height
        );
        block
    }

    /// Extend the main chain by `count` empty blocks.
    pub fn mine_blocks(&self, count: usize) {
        for _ in 0..count {
            self.mine_block_with_txs(&[]);
        }
    }

    /// Submit a block and return its verification context.
    pub fn submit(&self, block: Block) -> BlockVerificationContext {
        self.chain.add_new_block(block).unwrap()
    }
}

impl Default for TestChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_boots_and_mines() {
        let harness = TestChain::new();
        assert_eq!(harness.height(), 1);
        harness.mine_blocks(3);
        assert_eq!(harness.height(), 4);
    }
}
