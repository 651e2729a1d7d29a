//! # umbra-chain
//!
//! The core blockchain engine: validates, stores, and reconciles the
//! canonical sequence of blocks. Decides whether an observed block extends
//! the main chain, queues as an alternate, or is rejected; orchestrates
//! reorganization when a competing branch accumulates more work; and
//! enforces the consensus rules through `umbra-consensus`.
//!
//! All mutations of the main chain are totally ordered by one chain lock;
//! the prepare pipeline precomputes PoW hashes and output-scan tables in
//! parallel outside it and publishes the results to the guarded path.

mod chain;
mod error;
mod prepare;
mod reorg;
mod supplement;
mod template;

pub use chain::{Blockchain, ChainConfig, SyncMode};
pub use error::{ChainError, ChainResult};
pub use prepare::BlockCompleteEntry;
pub use template::BlockTemplate;
