//! # umbra-consensus
//!
//! Consensus rules for the Umbra blockchain.
//!
//! This crate provides:
//! - The hard-fork governor (height -> rule-set version, miner voting)
//! - The difficulty engine (four versioned algorithms, bootstrap pins,
//!   sliding window cache)
//! - Emission: block subsidy with the size penalty, the dev-fund schedule
//! - Fee schemes (dynamic per-kB, fixed per-kB, per-kB + per-ring-member)
//! - Checkpoints and the compiled-in hash-of-hashes fast-sync table
//! - Coinbase prevalidation and miner-reward validation
//! - The transaction verifier (structure, rings, signatures, fees)

mod block_validation;
mod checkpoints;
mod coinbase;
mod difficulty;
mod emission;
mod error;
mod fee;
mod hardfork;
mod network;
mod pow;
mod tx_validation;

pub use block_validation::{
    check_block_timestamp, check_block_timestamp_window, dev_fund_address, median,
    prevalidate_miner_transaction, validate_miner_transaction_v1, validate_miner_transaction_v2,
};
pub use checkpoints::Checkpoints;
pub use coinbase::{construct_miner_tx, AccountAddress};
pub use difficulty::{
    difficulty_blocks_count, next_difficulty, next_difficulty_v1, next_difficulty_v2,
    next_difficulty_v3, next_difficulty_v4, DifficultyCache,
};
pub use emission::{dev_fund_amount, get_block_reward};
pub use error::{ConsensusError, ConsensusResult};
pub use fee::{check_fee, dynamic_per_kb_fee, FeeContext};
pub use hardfork::{Feature, ForkEntry, HardFork, VotingInfo};
pub use network::{generate_genesis_block, Network, NetworkConfig};
pub use pow::{
    check_hash, get_block_longhash, hash_of_hashes_fold, parse_hash_of_hashes_blob, pow_hash,
};
pub use tx_validation::{check_tx_outputs, have_tx_keyimges_as_spent, ScanTable, TxVerifier};

/// Consensus constants.
///
/// Every value here is consensus-critical; fork-versioned values carry
/// the rule-set version in their name.
pub mod params {
    /// Target seconds between blocks.
    pub const DIFFICULTY_TARGET: u64 = 240;

    /// Unlock times at or above this value are wall-clock timestamps, not
    /// heights.
    pub const MAX_BLOCK_NUMBER: u64 = 500_000_000;

    pub const DIFFICULTY_WINDOW_V1: usize = 720;
    pub const DIFFICULTY_CUT_V1: usize = 60;
    pub const DIFFICULTY_LAG_V1: usize = 15;
    /// v1 consumes window + lag entries.
    pub const DIFFICULTY_BLOCKS_COUNT_V1: usize = DIFFICULTY_WINDOW_V1 + DIFFICULTY_LAG_V1;

    pub const DIFFICULTY_WINDOW_V2: usize = 60;
    pub const DIFFICULTY_BLOCKS_COUNT_V2: usize = DIFFICULTY_WINDOW_V2 + 1;

    pub const DIFFICULTY_WINDOW_V3: usize = 60;
    pub const DIFFICULTY_BLOCKS_COUNT_V3: usize = DIFFICULTY_WINDOW_V3 + 1;

    pub const DIFFICULTY_WINDOW_V4: usize = 45;
    pub const DIFFICULTY_BLOCKS_COUNT_V4: usize = DIFFICULTY_WINDOW_V4 + 1;

    /// Difficulty pinned over the bootstrap window after an algorithm
    /// change on mainnet.
    pub const DIFFICULTY_BOOTSTRAP_PIN: u128 = 480_000_000;

    pub const BLOCK_FUTURE_TIME_LIMIT_V2: u64 = 7200;
    pub const BLOCK_FUTURE_TIME_LIMIT_V3: u64 = 1440;

    pub const TIMESTAMP_CHECK_WINDOW_V1: usize = 60;
    pub const TIMESTAMP_CHECK_WINDOW_V2: usize = 60;
    pub const TIMESTAMP_CHECK_WINDOW_V3: usize = 11;

    /// Blocks whose sizes feed the reward median.
    pub const REWARD_BLOCKS_WINDOW: usize = 100;
    /// Below this median size no reward penalty applies.
    pub const BLOCK_SIZE_GROWTH_FAVORED_ZONE: u64 = 300_000;

    /// Coinbase outputs unlock this many blocks after their block.
    pub const MINED_MONEY_UNLOCK_WINDOW: u64 = 60;
    /// Minimum depth of an output below the tip before it may be spent.
    pub const DEFAULT_TX_SPENDABLE_AGE: u64 = 10;
    /// Grace applied when comparing height-interpreted unlock times.
    pub const LOCKED_TX_ALLOWED_DELTA_BLOCKS: u64 = 1;

    /// Reserved coinbase size assumed while sizing transactions for fees.
    pub const COINBASE_BLOB_RESERVED_SIZE: u64 = 600;

    /// Ring-size bounds. A ring of n members has mixin n - 1.
    pub const MAX_MIXIN: usize = 100;
    pub const MIN_MIXIN_V1: usize = 12;
    pub const MIN_MIXIN_V2: usize = 24;

    /// Poisson timestamp sanity check over deep reorgs. The calibration
    /// is consensus-frozen; do not retune.
    pub const POISSON_CHECK_TRIGGER: usize = 10;
    pub const POISSON_CHECK_DEPTH: usize = 60;
    pub const POISSON_LOG_P_REJECT: f64 = -75.0;

    /// Atomic units per coin.
    pub const COIN: u64 = 1_000_000_000;
    /// Total supply cap in atomic units.
    pub const MONEY_SUPPLY: u64 = 88_888_888 * COIN;
    /// Right-shift applied to the remaining supply per block.
    pub const EMISSION_SPEED_FACTOR: u32 = 19;
    /// Height granularity at which fee scheme (a) samples emission.
    pub const COIN_EMISSION_HEIGHT_INTERVAL: u64 = 10_800;

    pub const FEE_PER_KB: u64 = 100_000;
    pub const FEE_PER_RING_MEMBER: u64 = 10_000;
    pub const DYNAMIC_FEE_PER_KB_BASE_FEE: u64 = 400_000;
    /// Must stay divisible by 1_000_000 for the two-step 128-bit division.
    pub const DYNAMIC_FEE_PER_KB_BASE_BLOCK_REWARD: u64 = 10_000_000_000;

    /// Dev fund: flat per-block amount over an activation window.
    pub const DEV_FUND_PER_BLOCK: u64 = 8 * COIN / 10;
    pub const DEV_FUND_START: u64 = 40_000;
    pub const DEV_FUND_END: u64 = 1_000_000;

    /// Consecutive block hashes folded into one hash-of-hashes entry.
    pub const HASH_OF_HASHES_STEP: usize = 256;

    /// Byte cap for one full-block supplement response.
    pub const FIND_BLOCKCHAIN_SUPPLEMENT_MAX_SIZE: usize = 100 * 1024 * 1024;
    /// Id cap for one hashes-only supplement response.
    pub const BLOCK_IDS_SYNCHRONIZING_DEFAULT_COUNT: usize = 10_000;

    /// Window of minor-version votes the governor tracks.
    pub const HARDFORK_VOTING_WINDOW: usize = 10_080;
}
