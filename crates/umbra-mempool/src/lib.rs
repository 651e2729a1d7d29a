//! # umbra-mempool
//!
//! The transaction pool contract the chain core consumes. Policy (fee
//! prioritization, relay decisions) is deliberately thin; the core only
//! needs `add_tx`, `take_tx`, `have_tx`, the chain-height notifications,
//! and block-template filling.

mod error;
mod pool;

pub use error::{MempoolError, MempoolResult};
pub use pool::{PooledTransaction, TxPool};
