//! Transactions: tagged-sum inputs/outputs, tx-extra fields, and the ringCT
//! signature bundle.

use crate::codec::{ByteReader, ByteWriter, CodecError, CodecResult};
use crate::hash::{fast_hash, Hash};
use umbra_ringct::{Commitment, KeyImage, MlsagSignature, PublicKey, RangeProofBytes};

/// Lowest transaction version accepted anywhere on the chain.
pub const MIN_TRANSACTION_VERSION: u8 = 2;
/// Highest transaction version accepted anywhere on the chain.
pub const MAX_TRANSACTION_VERSION: u8 = 3;

/// A transaction input.
#[derive(Debug, Clone, PartialEq)]
pub enum TxIn {
    /// Coinbase input, carrying the height of its block.
    Gen { height: u64 },
    /// A key input spending one output out of a ring.
    ToKey {
        /// Ring amount; zero for confidential outputs.
        amount: u64,
        /// Relative offsets into the per-amount global output sequence.
        key_offsets: Vec<u64>,
        /// One-time spend tag.
        key_image: KeyImage,
    },
}

/// A transaction output: an amount (zero in the confidential era) and a
/// one-time destination key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxOut {
    pub amount: u64,
    pub target: PublicKey,
}

/// RingCT signature variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RctType {
    /// No signature; only valid on coinbase transactions.
    Null,
    /// One MLSAG over all inputs, ring-major mix ring.
    Full,
    /// One MLSAG per input, per-output range proofs.
    Simple,
    /// Simple form with one aggregated bulletproof for all outputs.
    Bulletproof,
}

impl RctType {
    pub fn to_u8(self) -> u8 {
        match self {
            RctType::Null => 0,
            RctType::Full => 1,
            RctType::Simple => 2,
            RctType::Bulletproof => 3,
        }
    }

    pub fn from_u8(v: u8) -> CodecResult<Self> {
        match v {
            0 => Ok(RctType::Null),
            1 => Ok(RctType::Full),
            2 => Ok(RctType::Simple),
            3 => Ok(RctType::Bulletproof),
            other => Err(CodecError::Invalid(format!("unknown rct type {}", other))),
        }
    }
}

/// The ringCT signature bundle attached to a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct RctSignature {
    pub rct_type: RctType,
    pub fee: u64,
    /// Per-input pseudo-output commitments (simple forms only).
    pub pseudo_outs: Vec<Commitment>,
    /// Per-output commitments.
    pub out_commitments: Vec<Commitment>,
    /// One MLSAG for `Full`; one per input otherwise.
    pub mlsags: Vec<MlsagSignature>,
    /// Per-output range proofs (`Full` and `Simple`).
    pub range_proofs: Vec<RangeProofBytes>,
    /// Aggregated range proof (`Bulletproof` only).
    pub bulletproof: Option<RangeProofBytes>,
}

impl Default for RctSignature {
    fn default() -> Self {
        Self {
            rct_type: RctType::Null,
            fee: 0,
            pseudo_outs: Vec::new(),
            out_commitments: Vec::new(),
            mlsags: Vec::new(),
            range_proofs: Vec::new(),
            bulletproof: None,
        }
    }
}

/// A parsed tx-extra field.
#[derive(Debug, Clone, PartialEq)]
pub enum TxExtraField {
    /// Tag 0x01: the transaction public key.
    PubKey(PublicKey),
    /// Tag 0x02: opaque padding/nonce data.
    Nonce(Vec<u8>),
    /// Tag 0x04: per-output additional public keys.
    AdditionalPubKeys(Vec<PublicKey>),
    /// Tag 0x08: uniform payment id.
    UniformPaymentId([u8; 32]),
}

const EXTRA_TAG_PUBKEY: u8 = 0x01;
const EXTRA_TAG_NONCE: u8 = 0x02;
const EXTRA_TAG_ADDITIONAL_PUBKEYS: u8 = 0x04;
const EXTRA_TAG_UNIFORM_PAYMENT_ID: u8 = 0x08;

/// Parse the opaque extra blob into tagged fields.
pub fn parse_tx_extra(extra: &[u8]) -> CodecResult<Vec<TxExtraField>> {
    let mut r = ByteReader::new(extra);
    let mut fields = Vec::new();
    while r.remaining() > 0 {
        match r.get_u8()? {
            EXTRA_TAG_PUBKEY => fields.push(TxExtraField::PubKey(PublicKey(r.get_bytes32()?))),
            EXTRA_TAG_NONCE => fields.push(TxExtraField::Nonce(r.get_var_bytes()?)),
            EXTRA_TAG_ADDITIONAL_PUBKEYS => {
                let count = r.get_len()?;
                let mut keys = Vec::with_capacity(count);
                for _ in 0..count {
                    keys.push(PublicKey(r.get_bytes32()?));
                }
                fields.push(TxExtraField::AdditionalPubKeys(keys));
            }
            EXTRA_TAG_UNIFORM_PAYMENT_ID => {
                fields.push(TxExtraField::UniformPaymentId(r.get_bytes32()?))
            }
            tag => return Err(CodecError::Invalid(format!("unknown extra tag {:#x}", tag))),
        }
    }
    Ok(fields)
}

/// Serialize tagged fields into an extra blob.
pub fn build_tx_extra(fields: &[TxExtraField]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    for field in fields {
        match field {
            TxExtraField::PubKey(pk) => {
                w.put_u8(EXTRA_TAG_PUBKEY);
                w.put_bytes32(&pk.0);
            }
            TxExtraField::Nonce(data) => {
                w.put_u8(EXTRA_TAG_NONCE);
                w.put_var_bytes(data);
            }
            TxExtraField::AdditionalPubKeys(keys) => {
                w.put_u8(EXTRA_TAG_ADDITIONAL_PUBKEYS);
                w.put_u32(keys.len() as u32);
                for k in keys {
                    w.put_bytes32(&k.0);
                }
            }
            TxExtraField::UniformPaymentId(id) => {
                w.put_u8(EXTRA_TAG_UNIFORM_PAYMENT_ID);
                w.put_bytes32(id);
            }
        }
    }
    w.into_bytes()
}

/// Convert relative ring offsets to absolute global indexes.
///
/// Arithmetic is unsigned 64-bit with wraparound, matching the wire rule.
pub fn relative_output_offsets_to_absolute(relative: &[u64]) -> Vec<u64> {
    let mut absolute = Vec::with_capacity(relative.len());
    let mut acc: u64 = 0;
    for (i, off) in relative.iter().enumerate() {
        acc = if i == 0 { *off } else { acc.wrapping_add(*off) };
        absolute.push(acc);
    }
    absolute
}

/// Convert absolute global indexes (ascending) to relative ring offsets.
pub fn absolute_output_offsets_to_relative(absolute: &[u64]) -> Vec<u64> {
    let mut relative = Vec::with_capacity(absolute.len());
    for (i, off) in absolute.iter().enumerate() {
        if i == 0 {
            relative.push(*off);
        } else {
            relative.push(off.wrapping_sub(absolute[i - 1]));
        }
    }
    relative
}

/// A transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub version: u8,
    pub unlock_time: u64,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub extra: Vec<u8>,
    pub rct: RctSignature,
}

impl Transaction {
    /// Whether this is a coinbase (miner) transaction.
    pub fn is_coinbase(&self) -> bool {
        matches!(self.vin.as_slice(), [TxIn::Gen { .. }])
    }

    /// The fee carried by the signature bundle; zero for coinbase.
    pub fn fee(&self) -> u64 {
        self.rct.fee
    }

    /// Key images of all key inputs, in input order.
    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> {
        self.vin.iter().filter_map(|i| match i {
            TxIn::ToKey { key_image, .. } => Some(key_image),
            TxIn::Gen { .. } => None,
        })
    }

    /// Sum of plaintext output amounts (meaningful for coinbase txs).
    pub fn output_amount(&self) -> u64 {
        self.vout.iter().fold(0u64, |acc, o| acc.saturating_add(o.amount))
    }

    fn encode_prefix(&self, w: &mut ByteWriter) {
        w.put_u8(self.version);
        w.put_u64(self.unlock_time);
        w.put_u32(self.vin.len() as u32);
        for vin in &self.vin {
            match vin {
                TxIn::Gen { height } => {
                    w.put_u8(0);
                    w.put_u64(*height);
                }
                TxIn::ToKey {
                    amount,
                    key_offsets,
                    key_image,
                } => {
                    w.put_u8(1);
                    w.put_u64(*amount);
                    w.put_u32(key_offsets.len() as u32);
                    for off in key_offsets {
                        w.put_u64(*off);
                    }
                    w.put_bytes32(&key_image.0);
                }
            }
        }
        w.put_u32(self.vout.len() as u32);
        for out in &self.vout {
            w.put_u64(out.amount);
            w.put_bytes32(&out.target.0);
        }
        w.put_var_bytes(&self.extra);
    }

    fn encode_rct(&self, w: &mut ByteWriter) {
        w.put_u8(self.rct.rct_type.to_u8());
        if self.rct.rct_type == RctType::Null {
            return;
        }
        w.put_u64(self.rct.fee);
        w.put_u32(self.rct.pseudo_outs.len() as u32);
        for c in &self.rct.pseudo_outs {
            w.put_bytes32(&c.0);
        }
        w.put_u32(self.rct.out_commitments.len() as u32);
        for c in &self.rct.out_commitments {
            w.put_bytes32(&c.0);
        }
        w.put_u32(self.rct.mlsags.len() as u32);
        for mlsag in &self.rct.mlsags {
            let n = mlsag.ss.len() as u32;
            let m = mlsag.ss.first().map(|r| r.len()).unwrap_or(0) as u32;
            w.put_u32(n);
            w.put_u32(m);
            for row in &mlsag.ss {
                for s in row {
                    w.put_scalar(s);
                }
            }
            w.put_scalar(&mlsag.cc);
            w.put_u32(mlsag.key_images.len() as u32);
            for ki in &mlsag.key_images {
                w.put_bytes32(&ki.0);
            }
        }
        w.put_u32(self.rct.range_proofs.len() as u32);
        for proof in &self.rct.range_proofs {
            w.put_var_bytes(&proof.0);
        }
        match &self.rct.bulletproof {
            Some(proof) => {
                w.put_u8(1);
                w.put_var_bytes(&proof.0);
            }
            None => w.put_u8(0),
        }
    }

    fn decode_prefix(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        let version = r.get_u8()?;
        let unlock_time = r.get_u64()?;
        let vin_count = r.get_len()?;
        let mut vin = Vec::with_capacity(vin_count);
        for _ in 0..vin_count {
            match r.get_u8()? {
                0 => vin.push(TxIn::Gen {
                    height: r.get_u64()?,
                }),
                1 => {
                    let amount = r.get_u64()?;
                    let offset_count = r.get_len()?;
                    let mut key_offsets = Vec::with_capacity(offset_count);
                    for _ in 0..offset_count {
                        key_offsets.push(r.get_u64()?);
                    }
                    let key_image = KeyImage(r.get_bytes32()?);
                    vin.push(TxIn::ToKey {
                        amount,
                        key_offsets,
                        key_image,
                    });
                }
                tag => return Err(CodecError::Invalid(format!("unknown input tag {}", tag))),
            }
        }
        let vout_count = r.get_len()?;
        let mut vout = Vec::with_capacity(vout_count);
        for _ in 0..vout_count {
            let amount = r.get_u64()?;
            let target = PublicKey(r.get_bytes32()?);
            vout.push(TxOut { amount, target });
        }
        let extra = r.get_var_bytes()?;
        Ok(Self {
            version,
            unlock_time,
            vin,
            vout,
            extra,
            rct: RctSignature::default(),
        })
    }

    fn decode_rct(r: &mut ByteReader<'_>) -> CodecResult<RctSignature> {
        let rct_type = RctType::from_u8(r.get_u8()?)?;
        if rct_type == RctType::Null {
            return Ok(RctSignature::default());
        }
        let fee = r.get_u64()?;
        let pseudo_count = r.get_len()?;
        let mut pseudo_outs = Vec::with_capacity(pseudo_count);
        for _ in 0..pseudo_count {
            pseudo_outs.push(Commitment(r.get_bytes32()?));
        }
        let out_count = r.get_len()?;
        let mut out_commitments = Vec::with_capacity(out_count);
        for _ in 0..out_count {
            out_commitments.push(Commitment(r.get_bytes32()?));
        }
        let mlsag_count = r.get_len()?;
        let mut mlsags = Vec::with_capacity(mlsag_count);
        for _ in 0..mlsag_count {
            let n = r.get_len()?;
            let m = r.get_len()?;
            let mut ss = Vec::with_capacity(n);
            for _ in 0..n {
                let mut row = Vec::with_capacity(m);
                for _ in 0..m {
                    row.push(r.get_scalar()?);
                }
                ss.push(row);
            }
            let cc = r.get_scalar()?;
            let ki_count = r.get_len()?;
            let mut key_images = Vec::with_capacity(ki_count);
            for _ in 0..ki_count {
                key_images.push(KeyImage(r.get_bytes32()?));
            }
            mlsags.push(MlsagSignature { cc, ss, key_images });
        }
        let proof_count = r.get_len()?;
        let mut range_proofs = Vec::with_capacity(proof_count);
        for _ in 0..proof_count {
            range_proofs.push(RangeProofBytes(r.get_var_bytes()?));
        }
        let bulletproof = match r.get_u8()? {
            0 => None,
            1 => Some(RangeProofBytes(r.get_var_bytes()?)),
            v => return Err(CodecError::Invalid(format!("bad bulletproof flag {}", v))),
        };
        Ok(RctSignature {
            rct_type,
            fee,
            pseudo_outs,
            out_commitments,
            mlsags,
            range_proofs,
            bulletproof,
        })
    }

    /// Serialize the prefix (everything covered by ring signatures).
    pub fn prefix_blob(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(128);
        self.encode_prefix(&mut w);
        w.into_bytes()
    }

    /// Serialize the full transaction.
    pub fn blob(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(256);
        self.encode_prefix(&mut w);
        self.encode_rct(&mut w);
        w.into_bytes()
    }

    /// Deserialize a full transaction blob.
    pub fn from_blob(blob: &[u8]) -> CodecResult<Self> {
        let mut r = ByteReader::new(blob);
        let mut tx = Self::decode_prefix(&mut r)?;
        tx.rct = Self::decode_rct(&mut r)?;
        r.finish()?;
        Ok(tx)
    }

    /// Hash of the prefix; the message ring signatures sign.
    pub fn prefix_hash(&self) -> Hash {
        fast_hash(&self.prefix_blob())
    }

    /// Hash of the full transaction; its chain identity.
    pub fn hash(&self) -> Hash {
        fast_hash(&self.blob())
    }

    /// Serialized size in bytes.
    pub fn blob_size(&self) -> usize {
        self.blob().len()
    }
}
