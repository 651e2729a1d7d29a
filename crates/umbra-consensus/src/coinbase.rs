//! Coinbase (miner transaction) construction.

use crate::emission::{dev_fund_amount, get_block_reward};
use crate::network::NetworkConfig;
use crate::params;
use crate::{ConsensusError, ConsensusResult};
use rand::rngs::OsRng;
use umbra_ringct::{
    derive_public_key, generate_key_derivation, random_scalar, KeyPair, PublicKey, SecretKey,
};
use umbra_types::{build_tx_extra, RctSignature, Transaction, TxExtraField, TxIn, TxOut};

/// A public address outputs are derived towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountAddress {
    pub spend_public: PublicKey,
    pub view_public: PublicKey,
}

/// Build the miner transaction for a block at `height`.
///
/// Output 0 pays the miner; while the dev fund is active, output 1 pays
/// the exact per-height dev amount to the dev wallet, derived under the
/// same transaction key so validators holding the dev view key can
/// partition the outputs.
#[allow(clippy::too_many_arguments)]
pub fn construct_miner_tx(
    config: &NetworkConfig,
    height: u64,
    median_size: u64,
    already_generated_coins: u64,
    current_block_size: u64,
    fee: u64,
    miner_address: &AccountAddress,
    extra_nonce: &[u8],
    tx_version: u8,
    dev_fund_active: bool,
    tx_secret: Option<SecretKey>,
) -> ConsensusResult<Transaction> {
    let base_reward = get_block_reward(
        median_size,
        current_block_size,
        already_generated_coins,
        height,
    )?;
    let dev_amount = if dev_fund_active {
        dev_fund_amount(height)
    } else {
        0
    };
    // The dev fund is minted on top of the subsidy; the miner keeps the
    // full subsidy plus fees.
    let miner_amount = base_reward
        .checked_add(fee)
        .ok_or_else(|| ConsensusError::BadReward("reward + fee overflows".into()))?;

    let tx_key = match tx_secret {
        Some(secret) => KeyPair::from_secret(secret.0),
        None => KeyPair::from_secret(random_scalar(&mut OsRng)),
    };

    let miner_derivation = generate_key_derivation(&miner_address.view_public, &tx_key.secret)?;
    let mut vout = vec![TxOut {
        amount: miner_amount,
        target: derive_public_key(&miner_derivation, 0, &miner_address.spend_public)?,
    }];

    if dev_amount > 0 {
        let dev_view_public =
            KeyPair::from_secret(config.dev_view_secret.0).public;
        let dev_derivation = generate_key_derivation(&dev_view_public, &tx_key.secret)?;
        vout.push(TxOut {
            amount: dev_amount,
            target: derive_public_key(&dev_derivation, 1, &config.dev_spend_public)?,
        });
    }

    let mut fields = vec![TxExtraField::PubKey(tx_key.public)];
    if !extra_nonce.is_empty() {
        fields.push(TxExtraField::Nonce(extra_nonce.to_vec()));
    }

    Ok(Transaction {
        version: tx_version,
        unlock_time: height + params::MINED_MONEY_UNLOCK_WINDOW,
        vin: vec![TxIn::Gen { height }],
        vout,
        extra: build_tx_extra(&fields),
        rct: RctSignature::default(),
    })
}
