//! Transaction validation scenarios over a real chain: every ringCT
//! variant, fork gating, and ring-membership rules.

use crate::generators::{build_spend_tx, find_owned_output};
use crate::harness::{fork_table_to, TestAccount, TestChain};
use curve25519_dalek_ng::scalar::Scalar;
use umbra_consensus::params;
use umbra_types::{RctType, Transaction};

fn spend_of(
    harness: &TestChain,
    source_height: u64,
    fee: u64,
    ring_size: usize,
    rct_type: RctType,
    tx_version: u8,
    uniform_pid: Option<[u8; 32]>,
) -> Transaction {
    let block = harness.store().block_at(source_height).unwrap();
    let input = find_owned_output(harness.store(), &block.miner_tx, 0, &harness.account)
        .expect("own the coinbase output");
    let recipient = TestAccount::generate();
    let amount = input.amount - fee;
    build_spend_tx(
        harness.store(),
        &[input],
        &[(amount, recipient.address())],
        fee,
        ring_size,
        rct_type,
        tx_version,
        uniform_pid,
    )
}

fn submit_in_block(harness: &TestChain, tx: Transaction) -> bool {
    harness
        .chain
        .pool()
        .add_tx(tx.clone(), true, true, false)
        .unwrap();
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
        std::slice::from_ref(&tx),
        difficulty,
    );
    let bvc = harness.chain.add_new_block(block).unwrap();
    bvc.added_to_main_chain
}

const V1_RING: usize = params::MIN_MIXIN_V1 + 1;

#[test]
fn test_simple_type_accepted() {
    let harness = TestChain::new();
    harness.mine_blocks(params::MINED_MONEY_UNLOCK_WINDOW as usize + V1_RING);
    let tx = spend_of(&harness, 4, 500, V1_RING, RctType::Simple, 2, None);
    assert!(submit_in_block(&harness, tx));
}

#[test]
fn test_full_type_accepted() {
    let harness = TestChain::new();
    harness.mine_blocks(params::MINED_MONEY_UNLOCK_WINDOW as usize + V1_RING);
    let tx = spend_of(&harness, 6, 500, V1_RING, RctType::Full, 2, None);
    assert!(submit_in_block(&harness, tx));
}

#[test]
fn test_two_output_spend_accepted() {
    let harness = TestChain::new();
    harness.mine_blocks(params::MINED_MONEY_UNLOCK_WINDOW as usize + V1_RING);

    let block = harness.store().block_at(7).unwrap();
    let input = find_owned_output(harness.store(), &block.miner_tx, 0, &harness.account).unwrap();
    let fee = 321;
    let half = (input.amount - fee) / 2;
    let rest = input.amount - fee - half;
    let a = TestAccount::generate();
    let b = TestAccount::generate();
    let tx = build_spend_tx(
        harness.store(),
        &[input],
        &[(half, a.address()), (rest, b.address())],
        fee,
        V1_RING,
        RctType::Simple,
        2,
        None,
    );
    assert!(submit_in_block(&harness, tx));
}

#[test]
fn test_bulletproof_type_gated_by_fork() {
    // Version 1 rules: the bulletproof variant is not allowed yet.
    let harness = TestChain::new();
    harness.mine_blocks(params::MINED_MONEY_UNLOCK_WINDOW as usize + V1_RING);
    let tx = spend_of(&harness, 5, 500, V1_RING, RctType::Bulletproof, 2, None);
    assert!(!submit_in_block(&harness, tx));
}

#[test]
fn test_bulletproof_type_accepted_after_fork() {
    // Rules at version 5: bulletproofs allowed, v3 txs and uniform payment
    // ids required, bumped ring size.
    let harness = TestChain::with_fork_table(fork_table_to(5));
    let ring = params::MIN_MIXIN_V2 + 1;
    harness.mine_blocks(params::MINED_MONEY_UNLOCK_WINDOW as usize + ring);

    let tx = spend_of(
        &harness,
        3,
        500,
        ring,
        RctType::Bulletproof,
        3,
        Some([9u8; 32]),
    );
    assert!(submit_in_block(&harness, tx));
}

#[test]
fn test_pre_bulletproof_type_rejected_once_required() {
    let harness = TestChain::with_fork_table(fork_table_to(7));
    let ring = params::MIN_MIXIN_V2 + 1;
    harness.mine_blocks(params::MINED_MONEY_UNLOCK_WINDOW as usize + ring);

    let tx = spend_of(&harness, 3, 500, ring, RctType::Simple, 3, Some([9u8; 32]));
    assert!(!submit_in_block(&harness, tx));
}

#[test]
fn test_missing_uniform_pid_rejected_under_strict_rules() {
    let harness = TestChain::with_fork_table(fork_table_to(5));
    let ring = params::MIN_MIXIN_V2 + 1;
    harness.mine_blocks(params::MINED_MONEY_UNLOCK_WINDOW as usize + ring);

    let tx = spend_of(&harness, 3, 500, ring, RctType::Bulletproof, 3, None);
    assert!(!submit_in_block(&harness, tx));
}

#[test]
fn test_tampered_signature_rejected() {
    let harness = TestChain::new();
    harness.mine_blocks(params::MINED_MONEY_UNLOCK_WINDOW as usize + V1_RING);
    let mut tx = spend_of(&harness, 5, 500, V1_RING, RctType::Simple, 2, None);
    tx.rct.mlsags[0].ss[2][0] += Scalar::one();
    assert!(!submit_in_block(&harness, tx));
}

#[test]
fn test_underfunded_commitments_rejected() {
    // Outputs claiming more than the inputs cannot balance.
    let harness = TestChain::new();
    harness.mine_blocks(params::MINED_MONEY_UNLOCK_WINDOW as usize + V1_RING);

    let block = harness.store().block_at(5).unwrap();
    let mut input =
        find_owned_output(harness.store(), &block.miner_tx, 0, &harness.account).unwrap();
    // Lie about the input amount; the pseudo-out then commits to the
    // inflated value and the MLSAG's commitment row no longer closes.
    input.amount += 10_000;
    let recipient = TestAccount::generate();
    let tx = build_spend_tx(
        harness.store(),
        &[input.clone()],
        &[(input.amount - 500, recipient.address())],
        500,
        V1_RING,
        RctType::Simple,
        2,
        None,
    );
    assert!(!submit_in_block(&harness, tx));
}

#[test]
fn test_young_output_rejected_by_spendable_age() {
    let harness = TestChain::new();
    harness.mine_blocks(params::MINED_MONEY_UNLOCK_WINDOW as usize + V1_RING);

    // The newest coinbase output is inside the unlock window.
    let tip = harness.height() - 1;
    let tx = spend_of(&harness, tip, 500, V1_RING, RctType::Simple, 2, None);
    assert!(!submit_in_block(&harness, tx));
}

#[test]
fn test_spend_stays_valid_as_chain_grows() {
    // A tx accepted at height h is still accepted once buried deeper.
    let harness = TestChain::new();
    harness.mine_blocks(params::MINED_MONEY_UNLOCK_WINDOW as usize + V1_RING);
    harness.mine_blocks(30);

    let tx = spend_of(&harness, 8, 500, V1_RING, RctType::Simple, 2, None);
    assert!(submit_in_block(&harness, tx));
}
