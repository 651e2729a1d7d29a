//! # umbra-types
//!
//! Chain data model for the Umbra node: hashes, blocks, transactions with
//! tagged-sum inputs/outputs, the ringCT signature bundle, tx-extra fields,
//! and the binary codec used for storage and wire blobs.

mod block;
mod codec;
mod hash;
mod transaction;
mod verification;

pub use block::{Block, BlockExtendedInfo, BlockHeader};
pub use codec::{ByteReader, ByteWriter, CodecError, CodecResult};
pub use hash::{fast_hash, tree_hash, Hash};
pub use transaction::{
    absolute_output_offsets_to_relative, build_tx_extra, parse_tx_extra,
    relative_output_offsets_to_absolute, RctSignature, RctType, Transaction, TxExtraField, TxIn,
    TxOut, MAX_TRANSACTION_VERSION, MIN_TRANSACTION_VERSION,
};
pub use verification::{BlockVerificationContext, TxVerificationContext};

/// Atomic currency units.
pub type Amount = u64;

/// Chain difficulty. Cumulative difficulty along any real chain fits u128.
pub type Difficulty = u128;
