//! Transaction handling
//!
//! Spending time-locked outputs with `bitcoin`'s transaction types:
//! - Legacy SIGHASH_ALL digests (BTC)
//! - BIP-143 style FORKID digests (BCH), which `bitcoin` has no sighash for
//! - Unspent outputs as reported by block explorers

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{serialize, serialize_hex};
use bitcoin::hashes::Hash;
use bitcoin::sighash::SighashCache;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::core::chain::SigHashFlags;
use crate::crypto::double_sha256;

// =============================================================================
// Constants
// =============================================================================

/// Current transaction version
pub const TX_VERSION: Version = Version::TWO;

/// Sequence used on time-locked inputs so nLockTime is enforced
pub const SEQUENCE_LOCKTIME_ENABLED: Sequence = Sequence::ZERO;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    #[error("Input index {index} out of range ({count} inputs)")]
    InputIndexOutOfRange { index: usize, count: usize },
    #[error("Unsupported sighash type 0x{0:02x}")]
    UnsupportedSigHash(u32),
    #[error("Invalid transaction id: {0}")]
    InvalidTxid(String),
    #[error("Signature hash failed: {0}")]
    Sighash(String),
}

// =============================================================================
// UTXO
// =============================================================================

/// Unspent transaction output as reported by a block explorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utxo {
    /// Big-endian display hex
    pub txid: String,
    pub vout: u32,
    /// Canonical value
    pub satoshis: u64,
    /// Value in coin units, for display only
    pub amount: f64,
    #[serde(default)]
    pub confirmations: u64,
    /// Locking script hex, when the explorer reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Utxo {
    pub fn outpoint(&self) -> Result<OutPoint, TransactionError> {
        let txid = Txid::from_str(&self.txid)
            .map_err(|_| TransactionError::InvalidTxid(self.txid.clone()))?;
        Ok(OutPoint::new(txid, self.vout))
    }
}

/// Sum of UTXO values, `None` if it doesn't fit in a `u64`
pub fn total_value(utxos: &[Utxo]) -> Option<u64> {
    utxos
        .iter()
        .try_fold(0u64, |total, utxo| total.checked_add(utxo.satoshis))
}

// =============================================================================
// Transaction Helpers
// =============================================================================

/// Wire-format hex, as handed to explorers for broadcasting
pub fn to_hex(tx: &Transaction) -> String {
    serialize_hex(tx)
}

/// Transaction id in display (big-endian) hex
pub fn txid_hex(tx: &Transaction) -> String {
    tx.compute_txid().to_string()
}

fn check_signing(
    tx: &Transaction,
    index: usize,
    flags: SigHashFlags,
) -> Result<(), TransactionError> {
    if index >= tx.input.len() {
        return Err(TransactionError::InputIndexOutOfRange {
            index,
            count: tx.input.len(),
        });
    }
    // Only SIGHASH_ALL is ever produced for time-locked spends
    if flags.base_type() != SigHashFlags::ALL.bits() || flags.contains(SigHashFlags::ANYONECANPAY) {
        return Err(TransactionError::UnsupportedSigHash(flags.bits()));
    }
    Ok(())
}

/// Original (pre-segwit) signature digest
pub fn signature_hash_legacy(
    tx: &Transaction,
    index: usize,
    script_code: &Script,
    flags: SigHashFlags,
) -> Result<[u8; 32], TransactionError> {
    check_signing(tx, index, flags)?;
    if flags.uses_forkid() {
        return Err(TransactionError::UnsupportedSigHash(flags.bits()));
    }

    SighashCache::new(tx)
        .legacy_signature_hash(index, script_code, flags.bits())
        .map(|hash| hash.to_byte_array())
        .map_err(|e| TransactionError::Sighash(e.to_string()))
}

/// Replay-protected digest (BIP-143 layout with SIGHASH_FORKID)
///
/// Commits to the value of the output being spent.
pub fn signature_hash_forkid(
    tx: &Transaction,
    index: usize,
    script_code: &Script,
    value: u64,
    flags: SigHashFlags,
) -> Result<[u8; 32], TransactionError> {
    check_signing(tx, index, flags)?;
    if !flags.uses_forkid() {
        return Err(TransactionError::UnsupportedSigHash(flags.bits()));
    }
    bip143_signature_hash(tx, index, script_code, value, flags.bits())
}

/// BIP-143 digest for SIGHASH_ALL with the given 32-bit hash type
pub fn bip143_signature_hash(
    tx: &Transaction,
    index: usize,
    script_code: &Script,
    value: u64,
    sighash_type: u32,
) -> Result<[u8; 32], TransactionError> {
    let input = tx
        .input
        .get(index)
        .ok_or(TransactionError::InputIndexOutOfRange {
            index,
            count: tx.input.len(),
        })?;

    let mut prevouts = Vec::with_capacity(tx.input.len() * 36);
    let mut sequences = Vec::with_capacity(tx.input.len() * 4);
    for txin in &tx.input {
        prevouts.extend_from_slice(&serialize(&txin.previous_output));
        sequences.extend_from_slice(&txin.sequence.0.to_le_bytes());
    }
    let mut outputs = Vec::new();
    for txout in &tx.output {
        outputs.extend_from_slice(&serialize(txout));
    }

    let mut preimage = Vec::with_capacity(156 + script_code.len());
    preimage.extend_from_slice(&tx.version.0.to_le_bytes());
    preimage.extend_from_slice(&double_sha256(&prevouts));
    preimage.extend_from_slice(&double_sha256(&sequences));
    preimage.extend_from_slice(&serialize(&input.previous_output));
    // Length-prefixed like any byte vector
    preimage.extend_from_slice(&serialize(&script_code.to_bytes()));
    preimage.extend_from_slice(&value.to_le_bytes());
    preimage.extend_from_slice(&input.sequence.0.to_le_bytes());
    preimage.extend_from_slice(&double_sha256(&outputs));
    preimage.extend_from_slice(&tx.lock_time.to_consensus_u32().to_le_bytes());
    preimage.extend_from_slice(&sighash_type.to_le_bytes());

    Ok(double_sha256(&preimage))
}

// =============================================================================
// Transaction Builder
// =============================================================================

/// Builder for spending a set of UTXOs
pub struct TransactionBuilder {
    inputs: Vec<TxIn>,
    outputs: Vec<TxOut>,
    lock_time: LockTime,
    sequence: Sequence,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: LockTime::ZERO,
            sequence: Sequence::MAX,
        }
    }

    /// Sequence applied to inputs added after this call
    pub fn sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = sequence;
        self
    }

    /// Add an input spending `utxo`
    pub fn add_input(mut self, utxo: &Utxo) -> Result<Self, TransactionError> {
        self.inputs.push(TxIn {
            previous_output: utxo.outpoint()?,
            script_sig: ScriptBuf::new(),
            sequence: self.sequence,
            witness: Witness::default(),
        });
        Ok(self)
    }

    /// Add an output
    pub fn add_output(mut self, script_pubkey: ScriptBuf, value: u64) -> Self {
        self.outputs.push(TxOut {
            value: Amount::from_sat(value),
            script_pubkey,
        });
        self
    }

    /// Set nLockTime (block height or timestamp, by consensus value)
    pub fn lock_time(mut self, lock_time: u32) -> Self {
        self.lock_time = LockTime::from_consensus(lock_time);
        self
    }

    /// Build without signing
    pub fn build(self) -> Transaction {
        Transaction {
            version: TX_VERSION,
            lock_time: self.lock_time,
            input: self.inputs,
            output: self.outputs,
        }
    }
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::consensus::encode::deserialize;
    use bitcoin::sighash::EcdsaSighashType;
    use bitcoin::PubkeyHash;

    const TXID: &str = "3f4fa19803dec4d6a84fae3821da7ac7577080ef75451294e71f9b20e0ab1e7b";

    /// Unsigned transaction of the BIP-143 native P2WPKH example
    const BIP143_TX: &str = "0100000002fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f0000000000eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac11000000";

    fn utxo(satoshis: u64, vout: u32) -> Utxo {
        Utxo {
            txid: TXID.to_string(),
            vout,
            satoshis,
            amount: satoshis as f64 / 1e8,
            confirmations: 6,
            script: None,
            address: None,
        }
    }

    fn p2pkh(byte: u8) -> ScriptBuf {
        ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array([byte; 20]))
    }

    fn sample_tx() -> Transaction {
        TransactionBuilder::new()
            .sequence(SEQUENCE_LOCKTIME_ENABLED)
            .add_input(&utxo(100_000, 0))
            .unwrap()
            .add_input(&utxo(20_000, 1))
            .unwrap()
            .add_output(p2pkh(9), 110_000)
            .lock_time(1_600_000_001)
            .build()
    }

    #[test]
    fn test_outpoint_byte_order() {
        let outpoint = utxo(1, 3).outpoint().unwrap();
        let internal = outpoint.txid.to_byte_array();
        assert_eq!(internal[0], 0x7b);
        assert_eq!(internal[31], 0x3f);
        assert_eq!(outpoint.txid.to_string(), TXID);
        assert_eq!(outpoint.vout, 3);

        let mut bad = utxo(1, 0);
        bad.txid = "abcd".to_string();
        assert!(matches!(bad.outpoint(), Err(TransactionError::InvalidTxid(_))));
    }

    #[test]
    fn test_serialization_layout() {
        let tx = sample_tx();
        let bytes = serialize(&tx);

        assert_eq!(&bytes[0..4], &2u32.to_le_bytes());
        assert_eq!(bytes[4], 2); // input count
        assert_eq!(&bytes[bytes.len() - 4..], &1_600_000_001u32.to_le_bytes());
        // version + count + 2 * (36 + 1 + 4) + count + (8 + 1 + 25) + locktime
        assert_eq!(bytes.len(), 4 + 1 + 2 * 41 + 1 + 34 + 4);
        assert_eq!(to_hex(&tx), hex::encode(&bytes));
        assert_eq!(txid_hex(&tx).len(), 64);
    }

    #[test]
    fn test_lock_time_enabled() {
        let tx = sample_tx();
        assert!(tx.is_lock_time_enabled());
        assert!(tx.input.iter().all(|i| i.sequence == Sequence::ZERO));
        assert_eq!(tx.lock_time.to_consensus_u32(), 1_600_000_001);

        let final_tx = TransactionBuilder::new()
            .add_input(&utxo(1, 0))
            .unwrap()
            .lock_time(5)
            .build();
        assert!(!final_tx.is_lock_time_enabled());
    }

    #[test]
    fn test_total_value_overflow() {
        assert_eq!(total_value(&[utxo(1_000, 0), utxo(2_500, 1)]), Some(3_500));
        assert_eq!(total_value(&[]), Some(0));
        let half = u64::MAX / 2 + 1;
        assert_eq!(total_value(&[utxo(half, 0), utxo(half, 1)]), None);
    }

    #[test]
    fn test_bip143_known_vector() {
        let tx: Transaction = deserialize(&hex::decode(BIP143_TX).unwrap()).unwrap();
        let script_code =
            ScriptBuf::from_hex("76a9141d0f172a0ecb48aee1be1f2687d2963ae33f71a188ac").unwrap();

        let digest = bip143_signature_hash(&tx, 1, &script_code, 600_000_000, 0x01).unwrap();
        assert_eq!(
            hex::encode(digest),
            "c37af31116d1b27caf68aae9e3ac82f1477929014d5b917657d0eb49478cb670"
        );

        // Same preimage rust-bitcoin hashes for segwit v0 spends
        let expected = SighashCache::new(&tx)
            .p2wsh_signature_hash(
                1,
                &script_code,
                Amount::from_sat(600_000_000),
                EcdsaSighashType::All,
            )
            .unwrap();
        assert_eq!(digest, expected.to_byte_array());
    }

    #[test]
    fn test_forkid_is_bip143_with_forkid_type() {
        let tx: Transaction = deserialize(&hex::decode(BIP143_TX).unwrap()).unwrap();
        let script_code =
            ScriptBuf::from_hex("76a9141d0f172a0ecb48aee1be1f2687d2963ae33f71a188ac").unwrap();
        let flags = SigHashFlags::ALL | SigHashFlags::FORKID;

        let forkid = signature_hash_forkid(&tx, 1, &script_code, 600_000_000, flags).unwrap();
        assert_eq!(
            forkid,
            bip143_signature_hash(&tx, 1, &script_code, 600_000_000, 0x41).unwrap()
        );
        assert_ne!(
            forkid,
            bip143_signature_hash(&tx, 1, &script_code, 600_000_000, 0x01).unwrap()
        );
    }

    #[test]
    fn test_legacy_sighash_depends_on_index() {
        let tx = sample_tx();
        let code = p2pkh(1);
        let h0 = signature_hash_legacy(&tx, 0, &code, SigHashFlags::ALL).unwrap();
        let h1 = signature_hash_legacy(&tx, 1, &code, SigHashFlags::ALL).unwrap();
        assert_ne!(h0, h1);
        assert_eq!(h0, signature_hash_legacy(&tx, 0, &code, SigHashFlags::ALL).unwrap());
    }

    #[test]
    fn test_forkid_sighash_commits_to_value() {
        let tx = sample_tx();
        let code = p2pkh(1);
        let flags = SigHashFlags::ALL | SigHashFlags::FORKID;
        let a = signature_hash_forkid(&tx, 0, &code, 100_000, flags).unwrap();
        let b = signature_hash_forkid(&tx, 0, &code, 100_001, flags).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, signature_hash_legacy(&tx, 0, &code, SigHashFlags::ALL).unwrap());
    }

    #[test]
    fn test_sighash_errors() {
        let tx = sample_tx();
        let code = ScriptBuf::new();
        assert_eq!(
            signature_hash_legacy(&tx, 2, &code, SigHashFlags::ALL),
            Err(TransactionError::InputIndexOutOfRange { index: 2, count: 2 })
        );
        assert!(matches!(
            signature_hash_legacy(&tx, 0, &code, SigHashFlags::NONE),
            Err(TransactionError::UnsupportedSigHash(_))
        ));
        assert!(matches!(
            signature_hash_legacy(&tx, 0, &code, SigHashFlags::ALL | SigHashFlags::FORKID),
            Err(TransactionError::UnsupportedSigHash(0x41))
        ));
        assert!(matches!(
            signature_hash_forkid(&tx, 0, &code, 1, SigHashFlags::ALL),
            Err(TransactionError::UnsupportedSigHash(0x01))
        ));
        assert!(matches!(
            bip143_signature_hash(&tx, 5, &code, 1, 0x41),
            Err(TransactionError::InputIndexOutOfRange { index: 5, count: 2 })
        ));
    }

    #[test]
    fn test_utxo_json() {
        let json = format!(
            r#"{{"txid":"{}","vout":1,"satoshis":5000,"amount":0.00005}}"#,
            TXID
        );
        let parsed: Utxo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.satoshis, 5000);
        assert_eq!(parsed.confirmations, 0);
        assert!(parsed.script.is_none());
    }
}
