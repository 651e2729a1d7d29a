//! Property-based tests using proptest.

use crate::harness::TestChain;
use proptest::prelude::*;
use umbra_consensus::params;
use umbra_types::Block;

/// Pre-forge a straight lineage of empty blocks on top of genesis.
fn forge_lineage(harness: &TestChain, count: usize) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(count);
    let mut prev = harness.top_hash();
    let mut height = harness.height();
    let mut generated = harness
        .store()
        .already_generated_coins(height - 1)
        .unwrap();
    let mut timestamp = harness.store().block_timestamp(height - 1).unwrap();
    for _ in 0..count {
        timestamp += params::DIFFICULTY_TARGET;
        let (block, next_generated) =
            harness.forge_block_on(prev, height, timestamp, generated, &[], 16);
        prev = block.hash();
        height += 1;
        generated = next_generated;
        blocks.push(block);
    }
    blocks
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// For any interleaving of appends and pops, the chain equals the
    /// prefix of appended blocks of length (appends - pops).
    #[test]
    fn prop_append_pop_interleavings(ops in prop::collection::vec(any::<bool>(), 1..24)) {
        let harness = TestChain::new();
        let blocks = forge_lineage(&harness, 10);
        let mut applied = 0usize;

        for op in ops {
            if op {
                if applied < blocks.len() {
                    let bvc = harness.submit(blocks[applied].clone());
                    prop_assert!(bvc.added_to_main_chain);
                    applied += 1;
                }
            } else if applied > 0 {
                harness.chain.pop_block_from_blockchain().unwrap();
                applied -= 1;
            }
        }

        prop_assert_eq!(harness.height(), 1 + applied as u64);
        for (i, block) in blocks.iter().take(applied).enumerate() {
            prop_assert_eq!(
                harness.store().block_hash_at(1 + i as u64).unwrap(),
                block.hash()
            );
        }
        // One coinbase output per block, nothing ever spent.
        prop_assert_eq!(harness.store().num_outputs(0).unwrap(), 1 + applied as u64);
        prop_assert!(harness.store().all_key_images().unwrap().is_empty());
    }
}

mod fee_properties {
    use super::*;
    use umbra_consensus::{check_fee, FeeContext, ForkEntry, HardFork};
    use umbra_ringct::KeyImage;
    use umbra_types::{RctSignature, RctType, Transaction, TxIn};

    fn hardfork_at(version: u8) -> HardFork {
        HardFork::new(
            (1..=version)
                .map(|v| ForkEntry {
                    version: v,
                    height: (v as u64 - 1) * 10,
                    threshold: 0,
                    time: 0,
                })
                .collect(),
        )
        .unwrap()
    }

    fn ring_tx(ring_size: usize) -> Transaction {
        Transaction {
            version: 2,
            unlock_time: 0,
            vin: vec![TxIn::ToKey {
                amount: 0,
                key_offsets: vec![1; ring_size],
                key_image: KeyImage([1u8; 32]),
            }],
            vout: Vec::new(),
            extra: Vec::new(),
            rct: RctSignature {
                rct_type: RctType::Simple,
                fee: 0,
                ..Default::default()
            },
        }
    }

    proptest! {
        /// Scheme (c): accepted iff fee covers per-kB plus per-ring-member.
        #[test]
        fn prop_fee_v2_threshold(
            blob_size in 1u64..50_000,
            ring_size in 1usize..60,
            fee in 0u64..10_000_000,
        ) {
            let hf = hardfork_at(6);
            let tx = ring_tx(ring_size);
            let ctx = FeeContext {
                median_block_size: 0,
                height: 1000,
                generated_coins_at_interval: 0,
            };
            let needed = ring_size as u64 * params::FEE_PER_RING_MEMBER
                + blob_size * params::FEE_PER_KB / 1024;
            prop_assert_eq!(
                check_fee(&hf, 1000, &tx, blob_size, fee, &ctx),
                fee >= needed
            );
        }

        /// Scheme (b): accepted iff fee covers the fixed per-kB rate.
        #[test]
        fn prop_fixed_fee_threshold(
            blob_size in 1u64..50_000,
            fee in 0u64..10_000_000,
        ) {
            let hf = hardfork_at(3);
            let tx = ring_tx(13);
            let ctx = FeeContext {
                median_block_size: 0,
                height: 1000,
                generated_coins_at_interval: 0,
            };
            let needed = blob_size * params::FEE_PER_KB / 1024;
            prop_assert_eq!(
                check_fee(&hf, 1000, &tx, blob_size, fee, &ctx),
                fee >= needed
            );
        }
    }
}
