//! End-to-end chain scenarios: genesis boot, linear append, double
//! spends, reorgs, orphans, and the Poisson gate.

use crate::generators::{build_spend_tx, find_owned_output, OwnedOutput};
use crate::harness::{TestAccount, TestChain};
use umbra_chain::BlockCompleteEntry;
use umbra_consensus::{generate_genesis_block, get_block_reward, next_difficulty_v1, params};
use umbra_types::{Hash, RctType, Transaction};

/// Ring size satisfying the v1 minimum mixin.
const RING: usize = params::MIN_MIXIN_V1 + 1;

/// Mine enough blocks that the first `RING` coinbase outputs have passed
/// the unlock window and spendable age.
fn mine_spendable_chain(harness: &TestChain) {
    harness.mine_blocks((params::MINED_MONEY_UNLOCK_WINDOW as usize) + RING);
}

/// The miner output of the block at `height`, ready to spend.
fn owned_coinbase_output(harness: &TestChain, height: u64) -> OwnedOutput {
    let block = harness.store().block_at(height).unwrap();
    find_owned_output(harness.store(), &block.miner_tx, 0, &harness.account)
        .expect("coinbase output belongs to the harness account")
}

fn simple_spend(harness: &TestChain, source_height: u64, fee: u64) -> Transaction {
    let input = owned_coinbase_output(harness, source_height);
    let recipient = TestAccount::generate();
    let amount = input.amount - fee;
    build_spend_tx(
        harness.store(),
        &[input],
        &[(amount, recipient.address())],
        fee,
        RING,
        RctType::Simple,
        2,
        None,
    )
}

// ==================== Scenario 1: genesis boot ====================

#[test]
fn test_genesis_boot() {
    let harness = TestChain::new();
    assert_eq!(harness.height(), 1);

    let genesis = generate_genesis_block(&harness.network).unwrap();
    assert_eq!(harness.top_hash(), genesis.hash());

    // Generated coins match the genesis emission exactly.
    let expected = get_block_reward(0, 0, 0, 0).unwrap();
    assert_eq!(
        harness.store().already_generated_coins(0).unwrap(),
        expected
    );
}

// ==================== Scenario 2: linear append ====================

#[test]
fn test_linear_append() {
    let harness = TestChain::new();
    harness.mine_blocks(3);
    assert_eq!(harness.height(), 4);

    // Cumulative difficulty is the running sum of per-block targets.
    let mut sum = 0u128;
    for h in 0..4 {
        sum += harness.chain.block_difficulty(h).unwrap();
        assert_eq!(harness.store().cumulative_difficulty(h).unwrap(), sum);
    }
    assert!(harness.chain.pool().is_empty());

    // Chain linking: every block points at its predecessor.
    for h in 1..4 {
        let block = harness.store().block_at(h).unwrap();
        assert_eq!(
            block.header.prev_id,
            harness.store().block_hash_at(h - 1).unwrap()
        );
    }
}

#[test]
fn test_resubmitting_known_block_reports_already_exists() {
    let harness = TestChain::new();
    let block = harness.mine_block_with_txs(&[]);
    let bvc = harness.submit(block);
    assert!(bvc.already_exists);
    assert!(!bvc.added_to_main_chain);
}

// ==================== Scenario 3: double spend ====================

#[test]
fn test_double_spend_rejected() {
    let harness = TestChain::new();
    mine_spendable_chain(&harness);

    let fee = 1000;
    let t1 = simple_spend(&harness, 5, fee);
    let t2 = simple_spend(&harness, 5, fee + 1); // same key image, different tx
    let key_image = *t1.key_images().next().unwrap();
    assert_eq!(Some(&key_image), t2.key_images().next());

    // Both in one block: the commit-time double-spend check rejects the
    // block and leaves the store untouched.
    harness.chain.pool().add_tx(t1.clone(), true, true, false).unwrap();
    harness.chain.pool().add_tx(t2.clone(), true, true, false).unwrap();
    let height = harness.height();
    let parent_generated = harness
        .store()
        .already_generated_coins(height - 1)
        .unwrap();
    let difficulty = harness.chain.block_difficulty_for_next_block().unwrap();
    let (bad_block, _) = harness.forge_block_on(
        harness.top_hash(),
        height,
        harness.next_timestamp(),
        parent_generated,
        &[t1.clone(), t2.clone()],
        difficulty,
    );
    let bvc = harness.submit(bad_block);
    assert!(bvc.verification_failed);
    assert_eq!(harness.height(), height);
    assert!(!harness.chain.have_tx_keyimg_as_spent(&key_image).unwrap());

    // T1 alone is fine.
    harness.mine_block_with_txs(&[t1.clone()]);
    assert!(harness.chain.have_tx_keyimg_as_spent(&key_image).unwrap());

    // A later block carrying T2 is rejected as a double spend.
    let height = harness.height();
    let parent_generated = harness
        .store()
        .already_generated_coins(height - 1)
        .unwrap();
    let difficulty = harness.chain.block_difficulty_for_next_block().unwrap();
    let (b2, _) = harness.forge_block_on(
        harness.top_hash(),
        height,
        harness.next_timestamp(),
        parent_generated,
        &[t2],
        difficulty,
    );
    let bvc = harness.submit(b2);
    assert!(bvc.verification_failed);
    assert_eq!(harness.height(), height);
}

// ==================== Scenario 4: reorg by difficulty ====================

#[test]
fn test_reorg_by_cumulative_difficulty() {
    let harness = TestChain::new();
    mine_spendable_chain(&harness);

    // A transaction committed on the branch that will be reorged away.
    let fee = 700;
    let t = simple_spend(&harness, 3, fee);
    harness.chain.pool().add_tx(t.clone(), false, true, false).unwrap();
    harness.mine_block_with_txs(&[t.clone()]);
    harness.mine_blocks(1);

    // Parent of the competing branch; the main suffix above it is three
    // blocks long, so a four-block branch overtakes on its last block.
    let divergence = harness.height() - 4;
    let old_tip = harness.top_hash();
    let old_cumulative = harness
        .store()
        .cumulative_difficulty(harness.height() - 1)
        .unwrap();

    // Build a four-block branch off `divergence`; with equal per-block
    // difficulty it overtakes the three-block main suffix on its last
    // block only.
    let mut prev = harness.store().block_hash_at(divergence).unwrap();
    let mut height = divergence + 1;
    let mut generated = harness
        .store()
        .already_generated_coins(divergence)
        .unwrap();
    let mut timestamp = harness.store().block_timestamp(divergence).unwrap();
    let mut alt_blocks = Vec::new();
    for _ in 0..4 {
        timestamp += params::DIFFICULTY_TARGET;
        let (block, next_generated) =
            harness.forge_block_on(prev, height, timestamp, generated, &[], 16);
        prev = block.hash();
        height += 1;
        generated = next_generated;
        alt_blocks.push(block);
    }

    // The first three queue as alternates; the fourth wins the reorg.
    for (i, block) in alt_blocks.iter().enumerate() {
        let bvc = harness.submit(block.clone());
        assert!(!bvc.verification_failed, "alt block {} rejected", i);
        if i < 3 {
            assert!(!bvc.added_to_main_chain);
        } else {
            assert!(bvc.added_to_main_chain, "expected reorg on final alt block");
        }
    }

    assert_eq!(harness.top_hash(), alt_blocks.last().unwrap().hash());
    let new_cumulative = harness
        .store()
        .cumulative_difficulty(harness.height() - 1)
        .unwrap();
    assert!(new_cumulative > old_cumulative);

    // The reorged-away transaction is back in the pool, and the old tip
    // survives in the alternate index.
    assert!(harness.chain.pool().have_tx(&t.hash()));
    let alt_blocks_now = harness.chain.get_alternative_blocks();
    assert!(alt_blocks_now.iter().any(|b| b.hash() == old_tip));
}

// ==================== Scenario 5: orphan then fill ====================

#[test]
fn test_orphan_then_fill() {
    let harness = TestChain::new();
    harness.mine_blocks(2);

    let height = harness.height();
    let generated = harness
        .store()
        .already_generated_coins(height - 1)
        .unwrap();
    let ts = harness.next_timestamp();
    let (b2, generated_after_b2) = harness.forge_block_on(
        harness.top_hash(),
        height,
        ts,
        generated,
        &[],
        16,
    );
    let (b3, _) = harness.forge_block_on(
        b2.hash(),
        height + 1,
        ts + params::DIFFICULTY_TARGET,
        generated_after_b2,
        &[],
        16,
    );

    // Child before parent: orphaned, no state change.
    let bvc = harness.submit(b3.clone());
    assert!(bvc.marked_as_orphaned);
    assert!(!bvc.added_to_main_chain);
    assert_eq!(harness.height(), height);

    // Parent arrives and is applied; the orphan is not re-examined.
    let bvc = harness.submit(b2);
    assert!(bvc.added_to_main_chain);
    assert_eq!(harness.height(), height + 1);

    // Resubmitting the ex-orphan applies it.
    let bvc = harness.submit(b3.clone());
    assert!(bvc.added_to_main_chain);
    assert_eq!(harness.height(), height + 2);
    assert_eq!(harness.top_hash(), b3.hash());
}

// ==================== Scenario 6: Poisson rejection ====================

#[test]
fn test_poisson_rejects_stretched_alt_chain() {
    let harness = TestChain::new();
    harness.mine_blocks(12);
    let main_height = harness.height(); // 13
    let old_tip = harness.top_hash();

    // Twelve alt blocks forking at height 2, timestamps uniformly spread
    // at 30x the target interval, claiming equal per-block difficulty.
    let divergence = 1u64;
    let mut prev = harness.store().block_hash_at(divergence).unwrap();
    let mut height = divergence + 1;
    let mut generated = harness
        .store()
        .already_generated_coins(divergence)
        .unwrap();
    let mut timestamp = harness.store().block_timestamp(divergence).unwrap();

    for i in 0..12 {
        timestamp += 30 * params::DIFFICULTY_TARGET;
        let (block, next_generated) =
            harness.forge_block_on(prev, height, timestamp, generated, &[], 16);
        prev = block.hash();
        height += 1;
        generated = next_generated;

        let bvc = harness.submit(block);
        if i < 11 {
            // Not yet heavier than the main chain: recorded alternates.
            assert!(!bvc.added_to_main_chain, "premature reorg at alt {}", i);
            assert!(!bvc.verification_failed, "alt block {} rejected early", i);
        } else {
            // The overtaking block triggers the reorg, which the Poisson
            // sanity check refuses.
            assert!(bvc.verification_failed, "Poisson check did not fire");
            assert!(!bvc.added_to_main_chain);
        }
    }

    // Main chain unchanged.
    assert_eq!(harness.height(), main_height);
    assert_eq!(harness.top_hash(), old_tip);
}

// ==================== Templates & prepare bracket ====================

#[test]
fn test_block_template_mines_and_applies() {
    let harness = TestChain::new();
    harness.mine_blocks(2);

    let template = harness
        .chain
        .create_block_template(&harness.account.address(), b"nonce")
        .unwrap();
    assert_eq!(template.height, harness.height());

    let mut block = template.block;
    TestChain::mine_to(&mut block, template.difficulty);
    let bvc = harness.submit(block);
    assert!(bvc.added_to_main_chain, "template block rejected: {:?}", bvc);
}

#[test]
fn test_prepare_cleanup_bracket_ingests_batch() {
    let harness = TestChain::new();
    mine_spendable_chain(&harness);

    let fee = 900;
    let t = simple_spend(&harness, 2, fee);
    harness.chain.pool().add_tx(t.clone(), false, true, false).unwrap();

    let height = harness.height();
    let parent_generated = harness
        .store()
        .already_generated_coins(height - 1)
        .unwrap();
    let difficulty = harness.chain.block_difficulty_for_next_block().unwrap();
    let (block, _) = harness.forge_block_on(
        harness.top_hash(),
        height,
        harness.next_timestamp(),
        parent_generated,
        std::slice::from_ref(&t),
        difficulty,
    );

    let entries = vec![BlockCompleteEntry {
        block: block.blob(),
        txs: vec![t.blob()],
    }];
    assert!(harness.chain.prepare_handle_incoming_blocks(&entries).unwrap());
    let bvc = harness.submit(block);
    assert!(bvc.added_to_main_chain, "prepared block rejected: {:?}", bvc);
    assert!(harness.chain.cleanup_handle_incoming_blocks(true).unwrap());
    assert_eq!(harness.height(), height + 1);
}

// ==================== Supplements & short history ====================

#[test]
fn test_short_chain_history_shape() {
    let harness = TestChain::new();
    harness.mine_blocks(40);
    let ids = harness.chain.get_short_chain_history().unwrap();

    // Dense near the tip.
    for (i, id) in ids.iter().take(10).enumerate() {
        assert_eq!(
            *id,
            harness
                .store()
                .block_hash_at(harness.height() - 1 - i as u64)
                .unwrap()
        );
    }
    // Genesis always included.
    assert_eq!(*ids.last().unwrap(), harness.store().block_hash_at(0).unwrap());
}

#[test]
fn test_find_blockchain_supplement() {
    let harness = TestChain::new();
    harness.mine_blocks(20);
    let genesis = harness.store().block_hash_at(0).unwrap();

    // A peer that knows up to height 12.
    let peer_history = vec![harness.store().block_hash_at(12).unwrap(), genesis];
    let split = harness
        .chain
        .find_blockchain_supplement(&peer_history)
        .unwrap();
    assert_eq!(split, Some(12));

    let (blocks, total_height, start_height) = harness
        .chain
        .find_blockchain_supplement_full(0, &peer_history, 100)
        .unwrap()
        .unwrap();
    assert_eq!(start_height, 12);
    assert_eq!(total_height, harness.height());
    assert_eq!(blocks.len() as u64, total_height - start_height);

    // Mismatched genesis: no supplement.
    let stranger = vec![Hash([7u8; 32])];
    assert!(harness
        .chain
        .find_blockchain_supplement(&stranger)
        .unwrap()
        .is_none());
}

#[test]
fn test_handle_get_objects() {
    let harness = TestChain::new();
    harness.mine_blocks(3);
    let id = harness.store().block_hash_at(2).unwrap();
    let missing = Hash([0xbb; 32]);

    let (blocks, missed_blocks, _txs, missed_txs) = harness
        .chain
        .handle_get_objects(&[id, missing], &[missing])
        .unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(missed_blocks, vec![missing]);
    assert_eq!(missed_txs, vec![missing]);
}

// ==================== Startup recovery ====================

#[test]
fn test_alt_difficulty_matches_main_computation() {
    // The spliced alt-difficulty path must agree with the direct formula
    // over the same window.
    let harness = TestChain::new();
    harness.mine_blocks(10);
    let height = harness.height();

    let mut timestamps = Vec::new();
    let mut difficulties = Vec::new();
    for h in 1..height {
        timestamps.push(harness.store().block_timestamp(h).unwrap());
        difficulties.push(harness.store().cumulative_difficulty(h).unwrap());
    }
    let expected = next_difficulty_v1(&timestamps, &difficulties, params::DIFFICULTY_TARGET);
    assert_eq!(
        harness.chain.block_difficulty_for_next_block().unwrap(),
        expected
    );
}
