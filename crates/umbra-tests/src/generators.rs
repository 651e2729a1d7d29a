//! Wallet-side generators: output recovery and ring-signed transaction
//! construction for tests.

use crate::harness::TestAccount;
use curve25519_dalek_ng::scalar::Scalar;
use rand::rngs::OsRng;
use umbra_consensus::AccountAddress;
use umbra_ringct::{
    commit, derive_public_key, derive_secret_key, fee_commitment, generate_key_derivation,
    key_image, prove_aggregate, prove_single, random_scalar, Commitment, KeyPair, MlsagSignature,
    PublicKey, RingMatrix, SecretKey,
};
use umbra_storage::{ChainStore, OutputRecord};
use umbra_types::{
    absolute_output_offsets_to_relative, build_tx_extra, parse_tx_extra, RctSignature, RctType,
    Transaction, TxExtraField, TxIn, TxOut,
};

/// An output we can spend: its slot in the amount-0 index, its plaintext
/// amount, and the recovered one-time keys.
#[derive(Clone)]
pub struct OwnedOutput {
    pub global_index: u64,
    pub amount: u64,
    pub secret: SecretKey,
    pub public: PublicKey,
    /// Commitment blinding as recorded on the chain (one for plaintext
    /// coinbase outputs).
    pub blinding: Scalar,
}

/// Recover the one-time secret of `tx`'s output `index` if it pays
/// `account`.
pub fn recover_output_secret(
    tx: &Transaction,
    index: usize,
    account: &TestAccount,
) -> Option<SecretKey> {
    let tx_pub = parse_tx_extra(&tx.extra).ok()?.into_iter().find_map(|f| match f {
        TxExtraField::PubKey(pk) => Some(pk),
        _ => None,
    })?;
    let derivation = generate_key_derivation(&tx_pub, &account.view.secret).ok()?;
    let expected = derive_public_key(&derivation, index as u64, &account.spend.public).ok()?;
    if expected != tx.vout.get(index)?.target {
        return None;
    }
    Some(derive_secret_key(&derivation, index as u64, &account.spend.secret))
}

/// Locate a recovered output in the amount-0 global index.
pub fn find_owned_output(
    store: &ChainStore,
    tx: &Transaction,
    index: usize,
    account: &TestAccount,
) -> Option<OwnedOutput> {
    let secret = recover_output_secret(tx, index, account)?;
    let public = tx.vout[index].target;
    let total = store.num_outputs(0).ok()?;
    for global_index in 0..total {
        let record = store.output(0, global_index).ok()?;
        if record.key == public {
            return Some(OwnedOutput {
                global_index,
                amount: tx.vout[index].amount,
                secret,
                public,
                blinding: Scalar::one(),
            });
        }
    }
    None
}

/// Ring member indexes for one input: the first `ring_size` global
/// indexes, with the real output swapped in. All referenced outputs must
/// already be spendable.
fn ring_indexes(real: u64, ring_size: usize) -> Vec<u64> {
    let mut indexes: Vec<u64> = (0..ring_size as u64).collect();
    if real >= ring_size as u64 {
        indexes[0] = real;
    }
    indexes.sort_unstable();
    indexes
}

/// Build a fully signed ringCT spend of `inputs`, paying `outputs` and
/// `fee`. Inputs must all carry the same ring size; for the `Full` type a
/// single input is supported. `uniform_pid` attaches the payment-id field
/// required under strict semantics forks.
#[allow(clippy::too_many_arguments)]
pub fn build_spend_tx(
    store: &ChainStore,
    inputs: &[OwnedOutput],
    outputs: &[(u64, AccountAddress)],
    fee: u64,
    ring_size: usize,
    rct_type: RctType,
    tx_version: u8,
    uniform_pid: Option<[u8; 32]>,
) -> Transaction {
    assert!(!inputs.is_empty());
    assert_eq!(
        inputs.iter().map(|i| i.amount).sum::<u64>(),
        outputs.iter().map(|(a, _)| *a).sum::<u64>() + fee,
        "amounts must balance"
    );
    if rct_type == RctType::Full {
        assert_eq!(inputs.len(), 1, "full signatures: one input in tests");
    }
    let mut rng = OsRng;

    // Strict semantics order inputs by descending key image.
    let mut inputs: Vec<OwnedOutput> = inputs.to_vec();
    inputs.sort_by(|a, b| {
        key_image(&b.secret, &b.public).cmp(&key_image(&a.secret, &a.public))
    });

    // Resolve rings.
    let mut rings: Vec<Vec<OutputRecord>> = Vec::with_capacity(inputs.len());
    let mut real_positions: Vec<usize> = Vec::with_capacity(inputs.len());
    let mut vin: Vec<TxIn> = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let indexes = ring_indexes(input.global_index, ring_size);
        let ring: Vec<OutputRecord> = indexes
            .iter()
            .map(|i| store.output(0, *i).expect("ring member exists"))
            .collect();
        let real_position = indexes
            .iter()
            .position(|i| *i == input.global_index)
            .expect("real member in ring");
        assert_eq!(ring[real_position].key, input.public);
        vin.push(TxIn::ToKey {
            amount: 0,
            key_offsets: absolute_output_offsets_to_relative(&indexes),
            key_image: key_image(&input.secret, &input.public),
        });
        rings.push(ring);
        real_positions.push(real_position);
    }

    // Destinations under a fresh transaction key.
    let tx_key = KeyPair::generate(&mut rng);
    let mut vout: Vec<TxOut> = Vec::with_capacity(outputs.len());
    for (i, (_amount, address)) in outputs.iter().enumerate() {
        let derivation = generate_key_derivation(&address.view_public, &tx_key.secret).unwrap();
        vout.push(TxOut {
            amount: 0,
            target: derive_public_key(&derivation, i as u64, &address.spend_public).unwrap(),
        });
    }

    let mut extra_fields = vec![TxExtraField::PubKey(tx_key.public)];
    if let Some(pid) = uniform_pid {
        extra_fields.push(TxExtraField::UniformPaymentId(pid));
    }
    let mut tx = Transaction {
        version: tx_version,
        unlock_time: 0,
        vin,
        vout,
        extra: build_tx_extra(&extra_fields),
        rct: RctSignature::default(),
    };
    let prefix_hash = tx.prefix_hash();

    // Range proofs bind the output commitments.
    let out_amounts: Vec<u64> = outputs.iter().map(|(a, _)| *a).collect();
    let out_blindings: Vec<Scalar> = out_amounts.iter().map(|_| random_scalar(&mut rng)).collect();
    let (range_proofs, bulletproof, out_commitments) = match rct_type {
        RctType::Bulletproof => {
            let (proof, commitments) =
                prove_aggregate(&out_amounts, &out_blindings, &prefix_hash.0).unwrap();
            (Vec::new(), Some(proof), commitments)
        }
        _ => {
            let mut proofs = Vec::with_capacity(out_amounts.len());
            let mut commitments = Vec::with_capacity(out_amounts.len());
            for (amount, blinding) in out_amounts.iter().zip(&out_blindings) {
                let (proof, commitment) =
                    prove_single(*amount, blinding, &prefix_hash.0).unwrap();
                proofs.push(proof);
                commitments.push(commitment);
            }
            (proofs, None, commitments)
        }
    };
    let out_blinding_sum: Scalar = out_blindings.iter().sum();

    let (pseudo_outs, mlsags) = match rct_type {
        RctType::Simple | RctType::Bulletproof => {
            // Pseudo-out blindings sum to the output blinding sum so the
            // commitments balance.
            let mut pseudo_blindings: Vec<Scalar> = (1..inputs.len())
                .map(|_| random_scalar(&mut rng))
                .collect();
            let partial: Scalar = pseudo_blindings.iter().sum();
            pseudo_blindings.insert(0, out_blinding_sum - partial);

            let mut pseudo_outs = Vec::with_capacity(inputs.len());
            let mut mlsags = Vec::with_capacity(inputs.len());
            for (j, input) in inputs.iter().enumerate() {
                let pseudo_point = commit(input.amount, &pseudo_blindings[j]);
                pseudo_outs.push(Commitment::from_point(&pseudo_point));

                let columns: Vec<Vec<_>> = rings[j]
                    .iter()
                    .map(|record| {
                        vec![
                            record.key.point().unwrap(),
                            record.commitment.point().unwrap() - pseudo_point,
                        ]
                    })
                    .collect();
                let matrix = RingMatrix::new(columns, 1).unwrap();
                let secrets = vec![
                    input.secret.clone(),
                    SecretKey(input.blinding - pseudo_blindings[j]),
                ];
                mlsags.push(
                    MlsagSignature::sign(
                        &mut rng,
                        &prefix_hash.0,
                        &matrix,
                        &secrets,
                        real_positions[j],
                    )
                    .unwrap(),
                );
            }
            (pseudo_outs, mlsags)
        }
        RctType::Full => {
            let input = &inputs[0];
            let ring = &rings[0];
            let out_sum = out_commitments
                .iter()
                .fold(fee_commitment(fee), |acc, c| acc + c.point().unwrap());
            let columns: Vec<Vec<_>> = ring
                .iter()
                .map(|record| {
                    vec![
                        record.key.point().unwrap(),
                        record.commitment.point().unwrap() - out_sum,
                    ]
                })
                .collect();
            let matrix = RingMatrix::new(columns, 1).unwrap();
            let secrets = vec![
                input.secret.clone(),
                SecretKey(input.blinding - out_blinding_sum),
            ];
            let mlsag = MlsagSignature::sign(
                &mut rng,
                &prefix_hash.0,
                &matrix,
                &secrets,
                real_positions[0],
            )
            .unwrap();
            (Vec::new(), vec![mlsag])
        }
        RctType::Null => unreachable!("null type is coinbase-only"),
    };

    tx.rct = RctSignature {
        rct_type,
        fee,
        pseudo_outs,
        out_commitments,
        mlsags,
        range_proofs,
        bulletproof,
    };
    tx
}
