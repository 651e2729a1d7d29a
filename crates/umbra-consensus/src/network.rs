//! Network selection: genesis, hard-fork table, dev-fund keys.

use crate::coinbase::{construct_miner_tx, AccountAddress};
use crate::hardfork::ForkEntry;
use crate::params;
use crate::ConsensusResult;
use umbra_ringct::{hash_to_point, hash_to_scalar, PublicKey, SecretKey};
use umbra_types::Block;

/// Which chain this node follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Network {
    Main,
    Test,
    Stage,
    /// In-process test chain with a caller-supplied fork table.
    Fake,
}

impl Network {
    fn tag(&self) -> &'static str {
        match self {
            Network::Main => "main",
            Network::Test => "test",
            Network::Stage => "stage",
            Network::Fake => "fake",
        }
    }
}

/// Immutable per-network configuration bound at startup.
#[derive(Clone)]
pub struct NetworkConfig {
    pub network: Network,
    pub fork_table: Vec<ForkEntry>,
    pub genesis_nonce: u32,
    pub genesis_timestamp: u64,
    /// Dev-fund wallet view key; compiled in so every node can partition
    /// coinbase outputs into dev vs miner.
    pub dev_view_secret: SecretKey,
    pub dev_spend_public: PublicKey,
    /// Address the genesis subsidy is paid to.
    pub genesis_address: AccountAddress,
    /// `(first_height, last_height, difficulty)` pins overriding the
    /// computed difficulty after an algorithm change.
    pub difficulty_pins: Vec<(u64, u64, u128)>,
    /// Compiled-in checkpoints, `(height, block id hex)`.
    pub checkpoints: Vec<(u64, &'static str)>,
}

fn dev_keys(network: Network) -> (SecretKey, PublicKey) {
    let view = SecretKey(hash_to_scalar(
        b"umbra.dev_fund.view",
        &[network.tag().as_bytes()],
    ));
    // No known discrete log: derived by hashing to the curve.
    let spend = PublicKey::from_point(&hash_to_point(
        format!("umbra.dev_fund.spend.{}", network.tag()).as_bytes(),
    ));
    (view, spend)
}

fn genesis_address(network: Network) -> AccountAddress {
    AccountAddress {
        spend_public: PublicKey::from_point(&hash_to_point(
            format!("umbra.genesis.spend.{}", network.tag()).as_bytes(),
        )),
        view_public: PublicKey::from_point(&hash_to_point(
            format!("umbra.genesis.view.{}", network.tag()).as_bytes(),
        )),
    }
}

fn ladder(heights: [u64; 7]) -> Vec<ForkEntry> {
    heights
        .iter()
        .enumerate()
        .map(|(i, h)| ForkEntry {
            version: (i + 1) as u8,
            height: *h,
            threshold: 0,
            time: 0,
        })
        .collect()
}

impl NetworkConfig {
    pub fn mainnet() -> Self {
        let (dev_view_secret, dev_spend_public) = dev_keys(Network::Main);
        let v3 = 80_000u64;
        let v6 = 200_000u64;
        Self {
            network: Network::Main,
            fork_table: ladder([0, 40_000, v3, 120_000, 160_000, v6, 240_000]),
            genesis_nonce: 10_000,
            genesis_timestamp: 0,
            dev_view_secret,
            dev_spend_public,
            genesis_address: genesis_address(Network::Main),
            // Bootstrap pins after the v3 and v6 algorithm changes.
            difficulty_pins: vec![
                (
                    v3,
                    v3 + params::DIFFICULTY_BLOCKS_COUNT_V2 as u64,
                    params::DIFFICULTY_BOOTSTRAP_PIN,
                ),
                (
                    v6,
                    v6 + params::DIFFICULTY_BLOCKS_COUNT_V4 as u64,
                    params::DIFFICULTY_BOOTSTRAP_PIN,
                ),
            ],
            checkpoints: Vec::new(),
        }
    }

    pub fn testnet() -> Self {
        let (dev_view_secret, dev_spend_public) = dev_keys(Network::Test);
        Self {
            network: Network::Test,
            fork_table: ladder([0, 100, 200, 300, 400, 500, 600]),
            genesis_nonce: 10_001,
            genesis_timestamp: 0,
            dev_view_secret,
            dev_spend_public,
            genesis_address: genesis_address(Network::Test),
            difficulty_pins: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    pub fn stagenet() -> Self {
        let (dev_view_secret, dev_spend_public) = dev_keys(Network::Stage);
        Self {
            network: Network::Stage,
            fork_table: ladder([0, 1_000, 2_000, 3_000, 4_000, 5_000, 6_000]),
            genesis_nonce: 10_002,
            genesis_timestamp: 0,
            dev_view_secret,
            dev_spend_public,
            genesis_address: genesis_address(Network::Stage),
            difficulty_pins: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    /// A fake chain for tests, with whatever fork schedule the test needs.
    pub fn fake(fork_table: Vec<ForkEntry>) -> Self {
        let (dev_view_secret, dev_spend_public) = dev_keys(Network::Fake);
        Self {
            network: Network::Fake,
            fork_table,
            genesis_nonce: 10_003,
            genesis_timestamp: 0,
            dev_view_secret,
            dev_spend_public,
            genesis_address: genesis_address(Network::Fake),
            difficulty_pins: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Main => Self::mainnet(),
            Network::Test => Self::testnet(),
            Network::Stage => Self::stagenet(),
            Network::Fake => Self::fake(vec![ForkEntry {
                version: 1,
                height: 0,
                threshold: 0,
                time: 0,
            }]),
        }
    }
}

/// Build the deterministic genesis block for a network.
pub fn generate_genesis_block(config: &NetworkConfig) -> ConsensusResult<Block> {
    let tx_secret = SecretKey(hash_to_scalar(
        b"umbra.genesis.tx_key",
        &[config.network.tag().as_bytes()],
    ));
    let miner_tx = construct_miner_tx(
        config,
        0,
        0,
        0,
        0,
        0,
        &config.genesis_address,
        &[],
        2,
        false,
        Some(tx_secret),
    )?;
    Ok(Block {
        header: umbra_types::BlockHeader {
            major_version: 1,
            minor_version: 1,
            timestamp: config.genesis_timestamp,
            prev_id: umbra_types::Hash::ZERO,
            nonce: config.genesis_nonce,
        },
        miner_tx,
        tx_hashes: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_is_deterministic() {
        let config = NetworkConfig::mainnet();
        let a = generate_genesis_block(&config).unwrap();
        let b = generate_genesis_block(&config).unwrap();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_networks_have_distinct_genesis() {
        let main = generate_genesis_block(&NetworkConfig::mainnet()).unwrap();
        let test = generate_genesis_block(&NetworkConfig::testnet()).unwrap();
        assert_ne!(main.hash(), test.hash());
    }

    #[test]
    fn test_genesis_claims_height_zero() {
        let block = generate_genesis_block(&NetworkConfig::testnet()).unwrap();
        assert_eq!(block.height(), 0);
        assert!(block.miner_tx.is_coinbase());
    }
}
