//! The transaction verifier.
//!
//! Validates a transaction's structure, ring membership, signatures,
//! commitments and unlock times against the chain store. Validation
//! failures are reported through [`TxVerificationContext`] and a `None`
//! return; only storage faults surface as errors.

use crate::hardfork::{Feature, HardFork};
use crate::params;
use crate::ConsensusResult;
use curve25519_dalek_ng::ristretto::RistrettoPoint;
use std::collections::HashMap;
use tracing::warn;
use umbra_ringct::{fee_commitment, KeyImage, RctError, RingMatrix};
use umbra_storage::{ChainStore, OutputRecord, StorageError, StorageResult};
use umbra_types::{
    parse_tx_extra, relative_output_offsets_to_absolute, Hash, RctType, Transaction,
    TxExtraField, TxIn, TxVerificationContext, MAX_TRANSACTION_VERSION, MIN_TRANSACTION_VERSION,
};

/// Precomputed `(tx prefix, key image) -> ring` cache filled by the
/// prepare pipeline and consumed here instead of store lookups.
#[derive(Debug, Default)]
pub struct ScanTable {
    entries: HashMap<Hash, HashMap<KeyImage, Vec<OutputRecord>>>,
}

impl ScanTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_tx(&self, prefix_hash: &Hash) -> bool {
        self.entries.contains_key(prefix_hash)
    }

    /// Register a tx; fails (returns false) on duplicates.
    pub fn add_tx(&mut self, prefix_hash: Hash) -> bool {
        use std::collections::hash_map::Entry;
        match self.entries.entry(prefix_hash) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(HashMap::new());
                true
            }
        }
    }

    /// Attach the resolved ring for one input. False on duplicate key
    /// images within the tx.
    pub fn add_ring(
        &mut self,
        prefix_hash: &Hash,
        key_image: KeyImage,
        outputs: Vec<OutputRecord>,
    ) -> bool {
        match self.entries.get_mut(prefix_hash) {
            Some(rings) => rings.insert(key_image, outputs).is_none(),
            None => false,
        }
    }

    fn get(&self, prefix_hash: &Hash, key_image: &KeyImage) -> Option<&Vec<OutputRecord>> {
        self.entries.get(prefix_hash)?.get(key_image)
    }
}

/// Pure output-side checks: amounts hidden, keys on the curve, and the
/// bulletproof presence/fork agreement rules.
pub fn check_tx_outputs(
    hardfork: &HardFork,
    height: u64,
    tx: &Transaction,
    tvc: &mut TxVerificationContext,
) -> bool {
    for out in &tx.vout {
        if out.amount != 0 {
            tvc.invalid_output = true;
            return false;
        }
    }
    for out in &tx.vout {
        if !out.target.is_valid() {
            tvc.invalid_output = true;
            return false;
        }
    }

    let has_bulletproofs = tx.rct.rct_type == RctType::Bulletproof;
    if has_bulletproofs != tx.rct.bulletproof.is_some() {
        warn!("Invalid signature semantics");
        tvc.invalid_output = true;
        return false;
    }
    if has_bulletproofs && !hardfork.check_feature(Feature::Bulletproofs, height) {
        warn!("Bulletproofs are not allowed yet");
        tvc.invalid_output = true;
        return false;
    }
    if !has_bulletproofs && hardfork.check_feature(Feature::BulletproofsRequired, height) {
        warn!("Bulletproofs are required");
        tvc.invalid_output = true;
        return false;
    }
    true
}

/// Store-coupled transaction verification.
pub struct TxVerifier<'a> {
    store: &'a ChainStore,
    hardfork: &'a HardFork,
    /// Current chain height (the height the containing block would get).
    chain_height: u64,
    /// Adjusted wall-clock time for timestamp-interpreted unlock times.
    adjusted_time: u64,
}

impl<'a> TxVerifier<'a> {
    pub fn new(
        store: &'a ChainStore,
        hardfork: &'a HardFork,
        chain_height: u64,
        adjusted_time: u64,
    ) -> Self {
        Self {
            store,
            hardfork,
            chain_height,
            adjusted_time,
        }
    }

    /// Whether an output with this unlock time may be spent now.
    pub fn is_tx_spendtime_unlocked(&self, unlock_time: u64) -> bool {
        if unlock_time < params::MAX_BLOCK_NUMBER {
            self.chain_height.saturating_sub(1) + params::LOCKED_TX_ALLOWED_DELTA_BLOCKS
                >= unlock_time
        } else {
            self.adjusted_time >= unlock_time
        }
    }

    /// Validate all inputs and signatures of `tx`.
    ///
    /// Returns `Ok(Some(max_used_block_height))` on success,
    /// `Ok(None)` with `tvc` flags set on a consensus violation, and
    /// `Err` only for storage faults.
    pub fn check_tx_inputs(
        &self,
        tx: &Transaction,
        tvc: &mut TxVerificationContext,
        scan_table: Option<&ScanTable>,
    ) -> StorageResult<Option<u64>> {
        let tx_hash = tx.hash();
        let prefix_hash = tx.prefix_hash();

        // Ring-size bounds.
        let mut lowest_mixin = usize::MAX;
        let mut highest_mixin = 0usize;
        for txin in &tx.vin {
            let TxIn::ToKey { key_offsets, .. } = txin else {
                continue;
            };
            if key_offsets.is_empty() {
                warn!(%tx_hash, "Empty key offsets");
                tvc.verification_failed = true;
                return Ok(None);
            }
            let vin_mixin = key_offsets.len() - 1;
            lowest_mixin = lowest_mixin.min(vin_mixin);
            highest_mixin = highest_mixin.max(vin_mixin);
            if vin_mixin > params::MAX_MIXIN {
                warn!(%tx_hash, ring_size = vin_mixin + 1, "Ring size too high");
                tvc.verification_failed = true;
                return Ok(None);
            }
        }

        let min_mixin = if self
            .hardfork
            .check_feature(Feature::RingSizeBump, self.chain_height)
        {
            params::MIN_MIXIN_V2
        } else {
            params::MIN_MIXIN_V1
        };
        if lowest_mixin < min_mixin {
            warn!(%tx_hash, ring_size = lowest_mixin + 1, "Ring size too low");
            tvc.low_mixin = true;
            return Ok(None);
        }

        let strict_tx_semantics = self
            .hardfork
            .check_feature(Feature::StrictTxSemantics, self.chain_height);
        if strict_tx_semantics && highest_mixin != lowest_mixin {
            warn!(
                %tx_hash,
                min = lowest_mixin,
                max = highest_mixin,
                "Mismatched input ring sizes"
            );
            tvc.verification_failed = true;
            return Ok(None);
        }

        if strict_tx_semantics && !self.check_strict_extra(tx, tvc) {
            return Ok(None);
        }

        if strict_tx_semantics && !check_inputs_sorted(tx) {
            warn!(%tx_hash, "Transaction has unsorted inputs");
            tvc.verification_failed = true;
            return Ok(None);
        }

        // Version bounds; v3 becomes mandatory with its fork.
        if tx.version > MAX_TRANSACTION_VERSION {
            warn!(%tx_hash, version = tx.version, "Version above maximum");
            tvc.verification_failed = true;
            return Ok(None);
        }
        let min_version = if self
            .hardfork
            .check_feature(Feature::NeedV3Txes, self.chain_height)
        {
            3
        } else {
            MIN_TRANSACTION_VERSION
        };
        if tx.version < min_version {
            warn!(%tx_hash, version = tx.version, min_version, "Version below minimum");
            tvc.verification_failed = true;
            return Ok(None);
        }

        // Resolve every ring, rejecting spent key images.
        let mut max_used_block_height = 0u64;
        let mut rings: Vec<Vec<OutputRecord>> = Vec::with_capacity(tx.vin.len());
        for txin in &tx.vin {
            let TxIn::ToKey {
                amount,
                key_offsets,
                key_image,
            } = txin
            else {
                warn!(%tx_hash, "Wrong input type in a key transaction");
                tvc.verification_failed = true;
                return Ok(None);
            };

            if self.store.has_key_image(key_image)? {
                warn!(%tx_hash, %key_image, "Key image already spent in blockchain");
                tvc.double_spend = true;
                return Ok(None);
            }

            match self.scan_output_keys(
                *amount,
                key_offsets,
                &prefix_hash,
                key_image,
                scan_table,
                &mut max_used_block_height,
            )? {
                Some(outputs) => rings.push(outputs),
                None => {
                    warn!(
                        %tx_hash,
                        amount,
                        indexes = key_offsets.len(),
                        "Failed to resolve ring outputs"
                    );
                    tvc.verification_failed = true;
                    return Ok(None);
                }
            }
        }

        // Signature verification by ringCT type.
        if let Err(e) = self.verify_rct(tx, &prefix_hash, &rings) {
            warn!(%tx_hash, error = %e, "Failed to check ring signatures");
            tvc.verification_failed = true;
            return Ok(None);
        }

        Ok(Some(max_used_block_height))
    }

    fn check_strict_extra(&self, tx: &Transaction, tvc: &mut TxVerificationContext) -> bool {
        let fields = match parse_tx_extra(&tx.extra) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(error = %e, "Malformed tx extra");
                tvc.verification_failed = true;
                return false;
            }
        };

        let uids_required = self
            .hardfork
            .check_feature(Feature::UniformIdsRequired, self.chain_height);
        let mut has_pubkey = false;
        let mut has_extra_pubkeys = false;
        let mut has_uniform_pid = false;
        for field in &fields {
            match field {
                TxExtraField::PubKey(_) => {
                    if has_pubkey {
                        warn!("Tx has a duplicate pub key");
                        tvc.verification_failed = true;
                        return false;
                    }
                    has_pubkey = true;
                }
                TxExtraField::AdditionalPubKeys(keys) => {
                    if has_extra_pubkeys {
                        warn!("Tx has a duplicate extra pub keys field");
                        tvc.verification_failed = true;
                        return false;
                    }
                    has_extra_pubkeys = true;
                    if keys.len() != tx.vout.len() {
                        warn!("Extra pubkey count must equal output count");
                        tvc.verification_failed = true;
                        return false;
                    }
                }
                TxExtraField::UniformPaymentId(_) if uids_required => {
                    if has_uniform_pid {
                        warn!("Tx has a duplicate uniform payment id field");
                        tvc.verification_failed = true;
                        return false;
                    }
                    has_uniform_pid = true;
                }
                _ => {}
            }
        }

        if uids_required && !has_uniform_pid {
            warn!("Transaction has no uniform payment id field");
            tvc.verification_failed = true;
            return false;
        }
        if !has_pubkey {
            warn!("Transaction has no pub key");
            tvc.verification_failed = true;
            return false;
        }
        true
    }

    /// Resolve the outputs an input's ring references: relative offsets to
    /// absolute indexes, scan-table or store fetch, unlock-time and
    /// spendable-age enforcement. `None` means a validation failure.
    fn scan_output_keys(
        &self,
        amount: u64,
        key_offsets: &[u64],
        prefix_hash: &Hash,
        key_image: &KeyImage,
        scan_table: Option<&ScanTable>,
        max_used_block_height: &mut u64,
    ) -> StorageResult<Option<Vec<OutputRecord>>> {
        let absolute = relative_output_offsets_to_absolute(key_offsets);

        let mut outputs: Vec<OutputRecord> = Vec::new();
        if let Some(found) = scan_table.and_then(|t| t.get(prefix_hash, key_image)) {
            outputs = found.clone();
        }
        if outputs.len() < absolute.len() {
            // Cache miss or partial result; fetch the remainder.
            let missing = &absolute[outputs.len()..];
            match self.store.output_keys(amount, missing) {
                Ok(fetched) => outputs.extend(fetched),
                Err(StorageError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        if outputs.len() != absolute.len() {
            return Ok(None);
        }

        for record in &outputs {
            if !self.is_tx_spendtime_unlocked(record.unlock_time) {
                warn!(
                    unlock_time = record.unlock_time,
                    "Ring member has locked unlock time"
                );
                return Ok(None);
            }
            if record.height + params::DEFAULT_TX_SPENDABLE_AGE > self.chain_height {
                warn!(
                    output_height = record.height,
                    chain_height = self.chain_height,
                    "Ring member is younger than the spendable age"
                );
                return Ok(None);
            }
            *max_used_block_height = (*max_used_block_height).max(record.height);
        }

        Ok(Some(outputs))
    }

    /// RingCT dispatch over the signature variant.
    fn verify_rct(
        &self,
        tx: &Transaction,
        prefix_hash: &Hash,
        rings: &[Vec<OutputRecord>],
    ) -> Result<(), RctError> {
        let rct = &tx.rct;
        match rct.rct_type {
            RctType::Null => Err(RctError::MalformedSignature(
                "null rct signature on non-coinbase tx".into(),
            )),
            RctType::Simple | RctType::Bulletproof => {
                self.verify_rct_simple(tx, prefix_hash, rings)
            }
            RctType::Full => self.verify_rct_full(tx, prefix_hash, rings),
        }
    }

    fn out_commitment_points(tx: &Transaction) -> Result<Vec<RistrettoPoint>, RctError> {
        if tx.rct.out_commitments.len() != tx.vout.len() {
            return Err(RctError::MalformedSignature(
                "output commitment count mismatch".into(),
            ));
        }
        tx.rct.out_commitments.iter().map(|c| c.point()).collect()
    }

    fn verify_rct_simple(
        &self,
        tx: &Transaction,
        prefix_hash: &Hash,
        rings: &[Vec<OutputRecord>],
    ) -> Result<(), RctError> {
        let rct = &tx.rct;
        if rct.mlsags.len() != tx.vin.len() || rct.pseudo_outs.len() != tx.vin.len() {
            return Err(RctError::MalformedSignature(
                "mismatched signature/input counts".into(),
            ));
        }
        let out_points = Self::out_commitment_points(tx)?;

        // One MLSAG per input over [one-time key, commitment - pseudo-out].
        let mut pseudo_sum = None;
        for (n, ring) in rings.iter().enumerate() {
            let mlsag = &rct.mlsags[n];
            let TxIn::ToKey { key_image, .. } = &tx.vin[n] else {
                return Err(RctError::MalformedSignature("wrong input type".into()));
            };
            if mlsag.key_images.len() != 1 || &mlsag.key_images[0] != key_image {
                return Err(RctError::MalformedSignature("mismatched key image".into()));
            }

            let pseudo = rct.pseudo_outs[n].point()?;
            pseudo_sum = Some(match pseudo_sum {
                None => pseudo,
                Some(sum) => sum + pseudo,
            });

            let columns = ring
                .iter()
                .map(|record| {
                    Ok(vec![record.key.point()?, record.commitment.point()? - pseudo])
                })
                .collect::<Result<Vec<_>, RctError>>()?;
            let matrix = RingMatrix::new(columns, 1)?;
            mlsag.verify(&prefix_hash.0, &matrix)?;
        }

        // Commitments must balance: Σ pseudo-outs = Σ out commitments + fee·H.
        let out_sum = out_points
            .iter()
            .fold(fee_commitment(rct.fee), |acc, p| acc + p);
        if pseudo_sum != Some(out_sum) {
            return Err(RctError::Unbalanced);
        }

        self.verify_range_proofs(tx, prefix_hash)
    }

    fn verify_rct_full(
        &self,
        tx: &Transaction,
        prefix_hash: &Hash,
        rings: &[Vec<OutputRecord>],
    ) -> Result<(), RctError> {
        let rct = &tx.rct;
        if rct.mlsags.len() != 1 {
            return Err(RctError::MalformedSignature("bad MLSAG count".into()));
        }
        if !rct.pseudo_outs.is_empty() {
            return Err(RctError::MalformedSignature(
                "pseudo outs on a full signature".into(),
            ));
        }
        let mlsag = &rct.mlsags[0];
        if mlsag.key_images.len() != tx.vin.len() {
            return Err(RctError::MalformedSignature(
                "mismatched key image count".into(),
            ));
        }
        for (n, txin) in tx.vin.iter().enumerate() {
            let TxIn::ToKey { key_image, .. } = txin else {
                return Err(RctError::MalformedSignature("wrong input type".into()));
            };
            if &mlsag.key_images[n] != key_image {
                return Err(RctError::MalformedSignature("mismatched key image".into()));
            }
        }

        let ring_size = rings.first().map(|r| r.len()).unwrap_or(0);
        if ring_size == 0 || rings.iter().any(|r| r.len() != ring_size) {
            return Err(RctError::MalformedRing(
                "full signature requires aligned rings".into(),
            ));
        }

        let out_points = Self::out_commitment_points(tx)?;
        let out_sum = out_points
            .iter()
            .fold(fee_commitment(rct.fee), |acc, p| acc + p);

        // Transpose input-major rings into ring-major columns; the last
        // row aggregates commitments against the outputs.
        let mut columns = Vec::with_capacity(ring_size);
        for i in 0..ring_size {
            let mut column = Vec::with_capacity(rings.len() + 1);
            let mut commitment_sum = None;
            for ring in rings {
                column.push(ring[i].key.point()?);
                let c = ring[i].commitment.point()?;
                commitment_sum = Some(match commitment_sum {
                    None => c,
                    Some(sum) => sum + c,
                });
            }
            let sum = commitment_sum.ok_or_else(|| {
                RctError::MalformedRing("full signature requires inputs".into())
            })?;
            column.push(sum - out_sum);
            columns.push(column);
        }
        let matrix = RingMatrix::new(columns, rings.len())?;
        mlsag.verify(&prefix_hash.0, &matrix)?;

        self.verify_range_proofs(tx, prefix_hash)
    }

    fn verify_range_proofs(&self, tx: &Transaction, prefix_hash: &Hash) -> Result<(), RctError> {
        let rct = &tx.rct;
        if rct.rct_type == RctType::Bulletproof {
            if !rct.range_proofs.is_empty() {
                return Err(RctError::MalformedSignature(
                    "per-output proofs on a bulletproof tx".into(),
                ));
            }
            let proof = rct
                .bulletproof
                .as_ref()
                .ok_or_else(|| RctError::RangeProof("missing bulletproof".into()))?;
            umbra_ringct::verify_aggregate(proof, &rct.out_commitments, &prefix_hash.0)
        } else {
            if rct.bulletproof.is_some() {
                return Err(RctError::MalformedSignature(
                    "aggregated proof on a pre-bulletproof tx".into(),
                ));
            }
            if rct.range_proofs.len() != rct.out_commitments.len() {
                return Err(RctError::RangeProof("range proof count mismatch".into()));
            }
            for (proof, commitment) in rct.range_proofs.iter().zip(&rct.out_commitments) {
                umbra_ringct::verify_single(proof, commitment, &prefix_hash.0)?;
            }
            Ok(())
        }
    }
}

/// Strict semantics require key inputs ordered by strictly descending key
/// image.
fn check_inputs_sorted(tx: &Transaction) -> bool {
    let mut last: Option<&KeyImage> = None;
    for txin in &tx.vin {
        if let TxIn::ToKey { key_image, .. } = txin {
            if let Some(last) = last {
                if key_image >= last {
                    return false;
                }
            }
            last = Some(key_image);
        }
    }
    true
}

/// Whether any of the transaction's key images is already spent.
pub fn have_tx_keyimges_as_spent(store: &ChainStore, tx: &Transaction) -> ConsensusResult<bool> {
    for key_image in tx.key_images() {
        if store.has_key_image(key_image)? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardfork::ForkEntry;
    use std::sync::Arc;
    use umbra_storage::MemoryStore;
    use umbra_types::{build_tx_extra, RctSignature, TxOut};

    fn hardfork_at(version: u8) -> HardFork {
        let table = (1..=version)
            .map(|v| ForkEntry {
                version: v,
                height: (v as u64 - 1) * 10,
                threshold: 0,
                time: 0,
            })
            .collect();
        HardFork::new(table).unwrap()
    }

    fn store() -> ChainStore {
        ChainStore::new(Arc::new(MemoryStore::new()))
    }

    fn key_tx(ring_sizes: &[usize]) -> Transaction {
        let vin = ring_sizes
            .iter()
            .enumerate()
            .map(|(i, n)| TxIn::ToKey {
                amount: 0,
                key_offsets: vec![1; *n],
                // Descending key images keep strict ordering happy.
                key_image: KeyImage([0xf0 - i as u8; 32]),
            })
            .collect();
        Transaction {
            version: 2,
            unlock_time: 0,
            vin,
            vout: vec![TxOut {
                amount: 0,
                target: umbra_ringct::PublicKey([1u8; 32]),
            }],
            extra: build_tx_extra(&[TxExtraField::PubKey(umbra_ringct::PublicKey([2u8; 32]))]),
            rct: RctSignature {
                rct_type: RctType::Simple,
                fee: 100,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_ring_size_too_low_sets_low_mixin() {
        let store = store();
        let hf = hardfork_at(1);
        let verifier = TxVerifier::new(&store, &hf, 100, 0);
        let tx = key_tx(&[3]);
        let mut tvc = TxVerificationContext::default();
        assert_eq!(verifier.check_tx_inputs(&tx, &mut tvc, None).unwrap(), None);
        assert!(tvc.low_mixin);
        assert!(!tvc.verification_failed);
    }

    #[test]
    fn test_ring_size_too_high_fails() {
        let store = store();
        let hf = hardfork_at(1);
        let verifier = TxVerifier::new(&store, &hf, 100, 0);
        let tx = key_tx(&[params::MAX_MIXIN + 2]);
        let mut tvc = TxVerificationContext::default();
        assert_eq!(verifier.check_tx_inputs(&tx, &mut tvc, None).unwrap(), None);
        assert!(tvc.verification_failed);
    }

    #[test]
    fn test_strict_semantics_requires_equal_rings() {
        let store = store();
        let hf = hardfork_at(3);
        let verifier = TxVerifier::new(&store, &hf, 100, 0);
        let tx = key_tx(&[13, 14]);
        let mut tvc = TxVerificationContext::default();
        assert_eq!(verifier.check_tx_inputs(&tx, &mut tvc, None).unwrap(), None);
        assert!(tvc.verification_failed);
    }

    #[test]
    fn test_strict_semantics_requires_one_pubkey() {
        let store = store();
        let hf = hardfork_at(3);
        let verifier = TxVerifier::new(&store, &hf, 100, 0);

        let mut tx = key_tx(&[13]);
        tx.extra = build_tx_extra(&[
            TxExtraField::PubKey(umbra_ringct::PublicKey([2u8; 32])),
            TxExtraField::PubKey(umbra_ringct::PublicKey([3u8; 32])),
        ]);
        let mut tvc = TxVerificationContext::default();
        assert_eq!(verifier.check_tx_inputs(&tx, &mut tvc, None).unwrap(), None);
        assert!(tvc.verification_failed);

        let mut tx = key_tx(&[13]);
        tx.extra = Vec::new();
        let mut tvc = TxVerificationContext::default();
        assert_eq!(verifier.check_tx_inputs(&tx, &mut tvc, None).unwrap(), None);
        assert!(tvc.verification_failed);
    }

    #[test]
    fn test_strict_semantics_requires_descending_key_images() {
        let store = store();
        let hf = hardfork_at(3);
        let verifier = TxVerifier::new(&store, &hf, 100, 0);

        let mut tx = key_tx(&[13, 13]);
        // Force ascending order.
        if let TxIn::ToKey { key_image, .. } = &mut tx.vin[0] {
            *key_image = KeyImage([0x01; 32]);
        }
        let mut tvc = TxVerificationContext::default();
        assert_eq!(verifier.check_tx_inputs(&tx, &mut tvc, None).unwrap(), None);
        assert!(tvc.verification_failed);
    }

    #[test]
    fn test_version_bounds() {
        let store = store();
        let hf = hardfork_at(4);
        let verifier = TxVerifier::new(&store, &hf, 100, 0);

        // v2 rejected once v3 txes are required.
        let tx = key_tx(&[25]);
        let mut tvc = TxVerificationContext::default();
        assert_eq!(verifier.check_tx_inputs(&tx, &mut tvc, None).unwrap(), None);
        assert!(tvc.verification_failed);

        let mut tx = key_tx(&[25]);
        tx.version = MAX_TRANSACTION_VERSION + 1;
        let mut tvc = TxVerificationContext::default();
        let verifier_v1 = TxVerifier::new(&store, &hf, 100, 0);
        assert_eq!(
            verifier_v1.check_tx_inputs(&tx, &mut tvc, None).unwrap(),
            None
        );
        assert!(tvc.verification_failed);
    }

    #[test]
    fn test_spent_key_image_sets_double_spend() {
        let store = store();
        let hf = hardfork_at(1);
        let tx = key_tx(&[13]);
        let key_image = tx.key_images().next().unwrap();
        store
            .storage()
            .put(umbra_storage::ColumnFamily::KeyImages, &key_image.0, &[])
            .unwrap();

        let verifier = TxVerifier::new(&store, &hf, 100, 0);
        let mut tvc = TxVerificationContext::default();
        assert_eq!(verifier.check_tx_inputs(&tx, &mut tvc, None).unwrap(), None);
        assert!(tvc.double_spend);
    }

    #[test]
    fn test_missing_ring_outputs_fail() {
        let store = store();
        let hf = hardfork_at(1);
        let verifier = TxVerifier::new(&store, &hf, 100, 0);
        let tx = key_tx(&[13]);
        let mut tvc = TxVerificationContext::default();
        // Empty store: the referenced outputs do not exist.
        assert_eq!(verifier.check_tx_inputs(&tx, &mut tvc, None).unwrap(), None);
        assert!(tvc.verification_failed);
    }

    #[test]
    fn test_check_tx_outputs_rules() {
        let hf = hardfork_at(1);
        let mut tx = key_tx(&[13]);
        let mut tvc = TxVerificationContext::default();

        // Plaintext amount in the confidential era.
        tx.vout[0].amount = 5;
        assert!(!check_tx_outputs(&hf, 100, &tx, &mut tvc));
        assert!(tvc.invalid_output);

        // Invalid target key encoding.
        let mut tx = key_tx(&[13]);
        tx.vout[0].target = umbra_ringct::PublicKey([0xff; 32]);
        let mut tvc = TxVerificationContext::default();
        assert!(!check_tx_outputs(&hf, 100, &tx, &mut tvc));

        // Bulletproof type before the fork.
        let mut tx = key_tx(&[13]);
        tx.vout[0].target =
            umbra_ringct::PublicKey::from_point(&umbra_ringct::hash_to_point(b"ok"));
        tx.rct.rct_type = RctType::Bulletproof;
        tx.rct.bulletproof = Some(umbra_ringct::RangeProofBytes(vec![0]));
        let mut tvc = TxVerificationContext::default();
        assert!(!check_tx_outputs(&hf, 100, &tx, &mut tvc));

        // Allowed after its fork.
        let hf5 = hardfork_at(5);
        let mut tvc = TxVerificationContext::default();
        assert!(check_tx_outputs(&hf5, 100, &tx, &mut tvc));

        // Pre-bulletproof tx after bulletproofs become mandatory.
        let hf7 = hardfork_at(7);
        let mut tx = key_tx(&[25]);
        tx.vout[0].target =
            umbra_ringct::PublicKey::from_point(&umbra_ringct::hash_to_point(b"ok"));
        let mut tvc = TxVerificationContext::default();
        assert!(!check_tx_outputs(&hf7, 100, &tx, &mut tvc));
    }
}
