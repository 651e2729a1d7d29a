//! Hard-fork governor.
//!
//! Maps heights to the active rule-set version from a static per-network
//! table, records miner minor-version votes over a sliding window, and
//! exposes the feature predicate the verifiers dispatch on. Vote state is
//! persisted alongside the chain so restarts are consistent.

use crate::params::HARDFORK_VOTING_WINDOW;
use crate::{ConsensusError, ConsensusResult};
use std::collections::VecDeque;
use tracing::{debug, info};
use umbra_storage::ChainStore;
use umbra_types::Block;

const VOTE_WINDOW_KEY: &[u8] = b"hf_vote_window";

/// One row of the activation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkEntry {
    pub version: u8,
    pub height: u64,
    /// Percent of window votes required before `time`; zero on every
    /// shipped network (activation is height-driven).
    pub threshold: u32,
    pub time: u64,
}

/// Consensus features gated on rule-set versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    DevFund,
    DifficultyV2,
    DifficultyV3,
    DifficultyV4,
    StrictTxSemantics,
    FixedFee,
    FeeV2,
    CheckBlockBackdate,
    RingSizeBump,
    NeedV3Txes,
    UniformIdsRequired,
    Bulletproofs,
    BulletproofsRequired,
}

impl Feature {
    /// The rule-set version that switches the feature on.
    pub fn activation_version(self) -> u8 {
        match self {
            Feature::DevFund | Feature::DifficultyV2 => 2,
            Feature::DifficultyV3
            | Feature::StrictTxSemantics
            | Feature::FixedFee
            | Feature::CheckBlockBackdate => 3,
            Feature::RingSizeBump | Feature::NeedV3Txes | Feature::UniformIdsRequired => 4,
            Feature::Bulletproofs => 5,
            Feature::DifficultyV4 | Feature::FeeV2 => 6,
            Feature::BulletproofsRequired => 7,
        }
    }
}

/// Vote statistics reported for a candidate version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VotingInfo {
    pub window: u32,
    pub votes: u32,
    pub threshold: u32,
    pub earliest_height: u64,
    pub voting: u8,
}

/// The governor.
pub struct HardFork {
    table: Vec<ForkEntry>,
    votes: VecDeque<u8>,
}

impl HardFork {
    /// Build from an activation table. Entries must be ascending in both
    /// version and height.
    pub fn new(mut table: Vec<ForkEntry>) -> ConsensusResult<Self> {
        table.sort_by_key(|e| e.version);
        for pair in table.windows(2) {
            if pair[1].height <= pair[0].height || pair[1].version != pair[0].version + 1 {
                return Err(ConsensusError::BadVersion {
                    version: pair[1].version,
                    height: pair[1].height,
                });
            }
        }
        if table.first().map(|e| e.height) != Some(0) {
            return Err(ConsensusError::BadVersion {
                version: table.first().map(|e| e.version).unwrap_or(0),
                height: table.first().map(|e| e.height).unwrap_or(0),
            });
        }
        Ok(Self {
            table,
            votes: VecDeque::with_capacity(HARDFORK_VOTING_WINDOW),
        })
    }

    /// The rule-set version governing a block at `height`.
    pub fn version_at(&self, height: u64) -> u8 {
        let mut version = 1;
        for entry in &self.table {
            if entry.height <= height {
                version = entry.version;
            } else {
                break;
            }
        }
        version
    }

    /// Activation height of a version, if scheduled.
    pub fn version_height(&self, version: u8) -> Option<u64> {
        self.table
            .iter()
            .find(|e| e.version == version)
            .map(|e| e.height)
    }

    /// Version for the next block of a chain currently `chain_height` long.
    pub fn current_version(&self, chain_height: u64) -> u8 {
        self.version_at(chain_height)
    }

    /// The newest version this build knows; miners vote for it via the
    /// minor version.
    pub fn ideal_version(&self) -> u8 {
        self.table.last().map(|e| e.version).unwrap_or(1)
    }

    /// The version the table schedules for `height`.
    pub fn ideal_version_for_height(&self, height: u64) -> u8 {
        self.version_at(height)
    }

    /// Whether a feature's rules apply to a block at `height`.
    pub fn check_feature(&self, feature: Feature, height: u64) -> bool {
        self.version_at(height) >= feature.activation_version()
    }

    /// Cheap per-block version test: the major version must match the
    /// schedule exactly and the vote may not regress below it.
    pub fn check_for_height(&self, block: &Block, height: u64) -> bool {
        block.header.major_version == self.version_at(height)
            && block.header.minor_version >= block.header.major_version
    }

    /// Record an accepted block's vote and persist the window.
    pub fn add(&mut self, store: &ChainStore, block: &Block) -> ConsensusResult<()> {
        self.votes.push_back(block.header.minor_version);
        while self.votes.len() > HARDFORK_VOTING_WINDOW {
            self.votes.pop_front();
        }
        self.persist(store)
    }

    fn persist(&self, store: &ChainStore) -> ConsensusResult<()> {
        let blob: Vec<u8> = self.votes.iter().copied().collect();
        store.put_metadata(VOTE_WINDOW_KEY, &blob)?;
        Ok(())
    }

    /// Restore the persisted vote window.
    pub fn init_from_store(&mut self, store: &ChainStore) -> ConsensusResult<()> {
        if let Some(blob) = store.get_metadata(VOTE_WINDOW_KEY)? {
            self.votes = blob.into_iter().collect();
            while self.votes.len() > HARDFORK_VOTING_WINDOW {
                self.votes.pop_front();
            }
        }
        debug!(votes = self.votes.len(), "Hard-fork state initialized");
        Ok(())
    }

    /// Recompute vote state after the chain was truncated to `height`.
    ///
    /// Reads the minor versions of the blocks now below the tip; the walk
    /// is bounded by the voting window.
    pub fn reorganize_from_chain_height(
        &mut self,
        store: &ChainStore,
        height: u64,
    ) -> ConsensusResult<()> {
        self.votes.clear();
        let start = height.saturating_sub(HARDFORK_VOTING_WINDOW as u64);
        for h in start..height {
            let block = store.block_at(h)?;
            self.votes.push_back(block.header.minor_version);
        }
        self.persist(store)?;
        info!(height, votes = self.votes.len(), "Hard-fork state recomputed");
        Ok(())
    }

    /// Vote statistics for a candidate version.
    pub fn voting_info(&self, version: u8) -> VotingInfo {
        let votes = self.votes.iter().filter(|v| **v >= version).count() as u32;
        let entry = self.table.iter().find(|e| e.version == version);
        VotingInfo {
            window: HARDFORK_VOTING_WINDOW as u32,
            votes,
            threshold: entry.map(|e| e.threshold).unwrap_or(0),
            earliest_height: entry.map(|e| e.height).unwrap_or(u64::MAX),
            voting: self.ideal_version(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<ForkEntry> {
        vec![
            ForkEntry {
                version: 1,
                height: 0,
                threshold: 0,
                time: 0,
            },
            ForkEntry {
                version: 2,
                height: 10,
                threshold: 0,
                time: 0,
            },
            ForkEntry {
                version: 3,
                height: 20,
                threshold: 0,
                time: 0,
            },
        ]
    }

    #[test]
    fn test_version_schedule() {
        let hf = HardFork::new(table()).unwrap();
        assert_eq!(hf.version_at(0), 1);
        assert_eq!(hf.version_at(9), 1);
        assert_eq!(hf.version_at(10), 2);
        assert_eq!(hf.version_at(19), 2);
        assert_eq!(hf.version_at(20), 3);
        assert_eq!(hf.version_at(1_000_000), 3);
        assert_eq!(hf.ideal_version(), 3);
    }

    #[test]
    fn test_rejects_malformed_tables() {
        // Heights must ascend with versions.
        let mut bad = table();
        bad[2].height = 5;
        assert!(HardFork::new(bad).is_err());

        // First entry must start at genesis.
        let bad = vec![ForkEntry {
            version: 1,
            height: 5,
            threshold: 0,
            time: 0,
        }];
        assert!(HardFork::new(bad).is_err());
    }

    #[test]
    fn test_feature_gating() {
        let hf = HardFork::new(table()).unwrap();
        assert!(!hf.check_feature(Feature::DevFund, 9));
        assert!(hf.check_feature(Feature::DevFund, 10));
        assert!(!hf.check_feature(Feature::StrictTxSemantics, 19));
        assert!(hf.check_feature(Feature::StrictTxSemantics, 20));
        // v4+ features never activate on this table.
        assert!(!hf.check_feature(Feature::Bulletproofs, 1_000_000));
    }
}
