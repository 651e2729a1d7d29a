//! Store-level integration: append/pop idempotence over every exported
//! query, and the RocksDB backend smoke test.

use crate::generators::{build_spend_tx, find_owned_output};
use crate::harness::{TestAccount, TestChain};
use std::sync::Arc;
use umbra_consensus::params;
use umbra_ringct::KeyImage;
use umbra_storage::{ChainStore, Database};
use umbra_types::{Hash, RctType};

/// Everything the store exports about chain state, for bit-for-bit
/// comparison.
#[derive(Debug, PartialEq)]
struct StoreSnapshot {
    height: u64,
    top_hash: Option<Hash>,
    tx_count: u64,
    outputs_zero: u64,
    key_images: Vec<KeyImage>,
    infos: Vec<(u64, u64, u128, u64)>,
}

fn snapshot(store: &ChainStore) -> StoreSnapshot {
    let height = store.height().unwrap();
    let mut key_images = store.all_key_images().unwrap();
    key_images.sort();
    let infos = (0..height)
        .map(|h| {
            let info = store.block_info(h).unwrap();
            (
                info.block_size,
                info.timestamp,
                info.cumulative_difficulty,
                info.already_generated_coins,
            )
        })
        .collect();
    StoreSnapshot {
        height,
        top_hash: store.top_block_hash().unwrap(),
        tx_count: store.total_transactions().unwrap(),
        outputs_zero: store.num_outputs(0).unwrap(),
        key_images,
        infos,
    }
}

#[test]
fn test_append_pop_idempotence_with_spends() {
    let harness = TestChain::new();
    let ring = params::MIN_MIXIN_V1 + 1;
    harness.mine_blocks(params::MINED_MONEY_UNLOCK_WINDOW as usize + ring);

    let before = snapshot(harness.store());

    // A block carrying a real ring spend.
    let block = harness.store().block_at(6).unwrap();
    let input = find_owned_output(harness.store(), &block.miner_tx, 0, &harness.account).unwrap();
    let recipient = TestAccount::generate();
    let fee = 444;
    let amount = input.amount - fee;
    let tx = build_spend_tx(
        harness.store(),
        &[input],
        &[(amount, recipient.address())],
        fee,
        ring,
        RctType::Simple,
        2,
        None,
    );
    harness.chain.pool().add_tx(tx.clone(), false, true, false).unwrap();
    harness.mine_block_with_txs(&[tx.clone()]);

    let spent = snapshot(harness.store());
    assert_eq!(spent.height, before.height + 1);
    assert_eq!(spent.key_images.len(), 1);

    // Popping restores the exact pre-append state.
    harness.store().pop_block().unwrap();
    assert_eq!(snapshot(harness.store()), before);
}

#[test]
fn test_rocksdb_backend_roundtrip() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db = Database::open(tmp.path()).unwrap();
    let store = ChainStore::new(Arc::new(db));

    // Reuse a block forged by the in-memory harness.
    let harness = TestChain::new();
    let genesis = harness.store().block_at(0).unwrap();
    store.append_block(&genesis, 120, 1, 5_000, &[]).unwrap();
    assert_eq!(store.height().unwrap(), 1);
    assert_eq!(store.top_block_hash().unwrap(), Some(genesis.hash()));
    assert_eq!(store.block_at(0).unwrap(), genesis);
    store.sync().unwrap();
}
