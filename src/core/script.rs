//! CLTV time-lock scripts
//!
//! Builds the two redeem script variants used for time-locked P2SH
//! addresses and the matching signature scripts:
//!
//! ```text
//! PKH: <locktime> OP_CHECKLOCKTIMEVERIFY OP_DROP OP_DUP OP_HASH160 <pubKeyHash> OP_EQUALVERIFY OP_CHECKSIG
//!      scriptSig: <sig> <pubKey> <redeemScript>
//! PK:  <locktime> OP_CHECKLOCKTIMEVERIFY OP_DROP <pubKey> OP_CHECKSIG
//!      scriptSig: <sig> <redeemScript>
//! ```
//!
//! Packages carry scripts in a text form (`4 0x00e6b567 OP_CHECKLOCKTIMEVERIFY ...`)
//! that is read and written here on top of `bitcoin`'s script types.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::*;
use bitcoin::opcodes::Opcode;
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::{PubkeyHash, PublicKey, Script, ScriptBuf, Transaction};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::core::chain::SigHashFlags;
use crate::core::transaction::{signature_hash_forkid, signature_hash_legacy, TransactionError};
use crate::crypto::KeyPair;

// =============================================================================
// Opcode Names
// =============================================================================

/// Names used by the text form; `bitcoin` spells some of them differently
const OPCODE_NAMES: &[(Opcode, &str)] = &[
    (OP_PUSHNUM_NEG1, "OP_1NEGATE"),
    (OP_NOP, "OP_NOP"),
    (OP_IF, "OP_IF"),
    (OP_NOTIF, "OP_NOTIF"),
    (OP_ELSE, "OP_ELSE"),
    (OP_ENDIF, "OP_ENDIF"),
    (OP_VERIFY, "OP_VERIFY"),
    (OP_RETURN, "OP_RETURN"),
    (OP_DROP, "OP_DROP"),
    (OP_DUP, "OP_DUP"),
    (OP_SIZE, "OP_SIZE"),
    (OP_EQUAL, "OP_EQUAL"),
    (OP_EQUALVERIFY, "OP_EQUALVERIFY"),
    (OP_RIPEMD160, "OP_RIPEMD160"),
    (OP_SHA256, "OP_SHA256"),
    (OP_HASH160, "OP_HASH160"),
    (OP_HASH256, "OP_HASH256"),
    (OP_CODESEPARATOR, "OP_CODESEPARATOR"),
    (OP_CHECKSIG, "OP_CHECKSIG"),
    (OP_CHECKSIGVERIFY, "OP_CHECKSIGVERIFY"),
    (OP_CHECKMULTISIG, "OP_CHECKMULTISIG"),
    (OP_CHECKMULTISIGVERIFY, "OP_CHECKMULTISIGVERIFY"),
    (OP_CLTV, "OP_CHECKLOCKTIMEVERIFY"),
    (OP_CSV, "OP_CHECKSEQUENCEVERIFY"),
];

fn opcode_name(op: Opcode) -> String {
    let code = op.to_u8();
    if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&code) {
        return format!("OP_{}", code - OP_PUSHNUM_1.to_u8() + 1);
    }
    OPCODE_NAMES
        .iter()
        .find(|(known, _)| *known == op)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("0x{:02x}", code))
}

fn opcode_from_name(name: &str) -> Option<Opcode> {
    if let Some((op, _)) = OPCODE_NAMES.iter().find(|(_, n)| *n == name) {
        return Some(*op);
    }
    // OP_NOP2 is the pre-BIP-65 name of OP_CHECKLOCKTIMEVERIFY
    if name == "OP_NOP2" {
        return Some(OP_CLTV);
    }
    name.strip_prefix("OP_")
        .and_then(|n| n.parse::<u8>().ok())
        .filter(|n| (1..=16).contains(n))
        .map(|n| Opcode::from(OP_PUSHNUM_1.to_u8() + n - 1))
}

// =============================================================================
// Script Errors
// =============================================================================

/// Script-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Malformed script: {0}")]
    Malformed(String),
    #[error("Unknown opcode: {0}")]
    UnknownOpcode(String),
    #[error("Script is not a CLTV time-lock script")]
    UnrecognizedTemplate,
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

fn push_bytes(data: Vec<u8>) -> Result<PushBytesBuf, ScriptError> {
    PushBytesBuf::try_from(data).map_err(|e| ScriptError::InvalidInput(e.to_string()))
}

fn instructions(script: &Script) -> Result<Vec<Instruction<'_>>, ScriptError> {
    script
        .instructions()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ScriptError::Malformed(e.to_string()))
}

/// Decode a script number of at most `max_len` bytes
///
/// CLTV reads five-byte numbers, one more than `bitcoin`'s `read_scriptint`
/// allows, so timestamps past 2038 need this.
pub fn decode_script_num(bytes: &[u8], max_len: usize) -> Result<i64, ScriptError> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > max_len {
        return Err(ScriptError::Malformed(format!(
            "script number too long: {} bytes",
            bytes.len()
        )));
    }

    let mut result: i64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        result |= (*byte as i64) << (8 * i);
    }

    let sign_bit = 0x80i64 << (8 * (bytes.len() - 1));
    if result & sign_bit != 0 {
        Ok(-(result & !sign_bit))
    } else {
        Ok(result)
    }
}

// =============================================================================
// Text Form
// =============================================================================

/// Human-readable form, e.g. `4 0x80e8b467 OP_CHECKLOCKTIMEVERIFY OP_DROP ...`
pub fn to_asm(script: &Script) -> Result<String, ScriptError> {
    let parts: Vec<String> = instructions(script)?
        .into_iter()
        .map(|ins| match ins {
            Instruction::PushBytes(data) => {
                let data = data.as_bytes();
                match data.len() {
                    0 => "OP_0".to_string(),
                    n if n < 0x4c => format!("{} 0x{}", n, hex::encode(data)),
                    n if n <= 0xff => format!("OP_PUSHDATA1 {} 0x{}", n, hex::encode(data)),
                    n if n <= 0xffff => format!("OP_PUSHDATA2 {} 0x{}", n, hex::encode(data)),
                    n => format!("OP_PUSHDATA4 {} 0x{}", n, hex::encode(data)),
                }
            }
            Instruction::Op(op) => opcode_name(op),
        })
        .collect();
    Ok(parts.join(" "))
}

/// Parse the human-readable form produced by [`to_asm`]
pub fn from_asm(s: &str) -> Result<ScriptBuf, ScriptError> {
    let tokens: Vec<&str> = s.split_whitespace().collect();
    let mut builder = Builder::new();
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i];

        if matches!(token, "OP_PUSHDATA1" | "OP_PUSHDATA2" | "OP_PUSHDATA4") {
            let data = asm_push_data(&tokens, i + 1)?;
            builder = builder.push_slice(push_bytes(data)?);
            i += 3;
        } else if token == "OP_0" {
            builder = builder.push_opcode(OP_PUSHBYTES_0);
            i += 1;
        } else if let Some(op) = opcode_from_name(token) {
            builder = builder.push_opcode(op);
            i += 1;
        } else if let Ok(len) = token.parse::<u8>() {
            if len == 0 || len >= 0x4c {
                return Err(ScriptError::Malformed(format!("bad push length {}", len)));
            }
            let data = asm_push_data(&tokens, i)?;
            builder = builder.push_slice(push_bytes(data)?);
            i += 2;
        } else if let Some(raw) = token.strip_prefix("0x").filter(|r| r.len() == 2) {
            let code = u8::from_str_radix(raw, 16)
                .map_err(|_| ScriptError::UnknownOpcode(token.to_string()))?;
            builder = builder.push_opcode(Opcode::from(code));
            i += 1;
        } else {
            return Err(ScriptError::UnknownOpcode(token.to_string()));
        }
    }

    Ok(builder.into_script())
}

/// Reads `<len> 0x<hex>` starting at `start` and checks they agree
fn asm_push_data(tokens: &[&str], start: usize) -> Result<Vec<u8>, ScriptError> {
    let (len_token, data_token) = match (tokens.get(start), tokens.get(start + 1)) {
        (Some(l), Some(d)) => (*l, *d),
        _ => return Err(ScriptError::Malformed("truncated data push".to_string())),
    };

    let expected: usize = len_token
        .parse()
        .map_err(|_| ScriptError::Malformed(format!("bad push length {}", len_token)))?;
    let hex_data = data_token
        .strip_prefix("0x")
        .ok_or_else(|| ScriptError::Malformed(format!("expected hex data, got {}", data_token)))?;
    let data = hex::decode(hex_data)
        .map_err(|e| ScriptError::Malformed(format!("invalid push data: {}", e)))?;

    if expected != data.len() {
        return Err(ScriptError::Malformed(format!(
            "push length {} does not match {} data bytes",
            expected,
            data.len()
        )));
    }
    Ok(data)
}

/// Text form when the script decodes, hex otherwise
pub fn script_to_string(script: &Script) -> String {
    to_asm(script).unwrap_or_else(|_| script.to_hex_string())
}

/// Accepts either raw hex or the human-readable form
pub fn parse_script(s: &str) -> Result<ScriptBuf, ScriptError> {
    let s = s.trim();
    let is_hex = !s.is_empty() && s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit());
    if is_hex {
        ScriptBuf::from_hex(s).map_err(|e| ScriptError::Malformed(format!("invalid hex: {}", e)))
    } else {
        from_asm(s)
    }
}

// =============================================================================
// Time-Lock Variants
// =============================================================================

/// Which locking clause follows the CLTV check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeLockVariant {
    /// `<pubKey> OP_CHECKSIG`
    #[serde(rename = "PK")]
    PayToPubKey,
    /// `OP_DUP OP_HASH160 <pubKeyHash> OP_EQUALVERIFY OP_CHECKSIG`
    #[default]
    #[serde(rename = "PKH")]
    PayToPubKeyHash,
}

impl TimeLockVariant {
    /// Rough size in bytes of a transaction spending `num_inputs` outputs
    /// locked with this variant to a single destination
    pub fn estimated_tx_size(&self, num_inputs: usize) -> usize {
        match self {
            TimeLockVariant::PayToPubKey => 45 + 156 * num_inputs,
            TimeLockVariant::PayToPubKeyHash => 45 + 180 * num_inputs,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TimeLockVariant::PayToPubKey => "PK",
            TimeLockVariant::PayToPubKeyHash => "PKH",
        }
    }

    /// Recognize the variant a redeem script was built with
    pub fn detect(script: &Script) -> Result<Self, ScriptError> {
        parse_redeem_script(script).map(|info| info.variant)
    }
}

impl fmt::Display for TimeLockVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for TimeLockVariant {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pk" | "p2pk" => Ok(TimeLockVariant::PayToPubKey),
            "pkh" | "p2pkh" => Ok(TimeLockVariant::PayToPubKeyHash),
            other => Err(ScriptError::InvalidInput(format!(
                "unknown time-lock variant: {}",
                other
            ))),
        }
    }
}

/// Key commitment found after the CLTV check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockingKey {
    PubKey(PublicKey),
    PubKeyHash(PubkeyHash),
}

/// Decoded contents of a CLTV redeem script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemScriptInfo {
    pub variant: TimeLockVariant,
    pub lock_time: u32,
    pub locking_key: LockingKey,
}

impl RedeemScriptInfo {
    /// Whether `key` is the one this script pays to
    pub fn is_spendable_by(&self, key: &KeyPair) -> bool {
        match &self.locking_key {
            LockingKey::PubKey(pk) => *pk == key.public_key,
            LockingKey::PubKeyHash(hash) => *hash == key.public_key_hash(),
        }
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Estimated size in bytes of the spending transaction
pub fn estimate_tx_size(variant: TimeLockVariant, num_inputs: usize) -> usize {
    variant.estimated_tx_size(num_inputs)
}

/// Build the redeem script locking funds to `public_key` until
/// `lock_time_seconds`
pub fn build_redeem_script(
    variant: TimeLockVariant,
    lock_time_seconds: i64,
    public_key: &PublicKey,
) -> Result<ScriptBuf, ScriptError> {
    let lock_time = u32::try_from(lock_time_seconds).map_err(|_| {
        ScriptError::InvalidInput(format!(
            "lock time {} is outside the 4-byte unsigned range",
            lock_time_seconds
        ))
    })?;
    if LockTime::from_consensus(lock_time).is_block_height() {
        return Err(ScriptError::InvalidInput(format!(
            "lock time {} is a block height, not a Unix timestamp",
            lock_time
        )));
    }

    let builder = Builder::new()
        .push_int(lock_time_seconds)
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP);

    let builder = match variant {
        TimeLockVariant::PayToPubKey => builder.push_key(public_key).push_opcode(OP_CHECKSIG),
        TimeLockVariant::PayToPubKeyHash => builder
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(public_key.pubkey_hash())
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG),
    };

    Ok(builder.into_script())
}

/// Sign input `input_index` of `tx` and assemble its scriptSig
///
/// With FORKID set in `sighash_flags` the replay-protected digest is used,
/// which commits to the spent output's value, so `input_value` is required.
pub fn build_script_sig(
    variant: TimeLockVariant,
    tx: &Transaction,
    input_index: usize,
    key: &KeyPair,
    redeem_script: &Script,
    sighash_flags: SigHashFlags,
    input_value: Option<u64>,
) -> Result<ScriptBuf, ScriptError> {
    let digest = if sighash_flags.uses_forkid() {
        let value = input_value.ok_or_else(|| {
            ScriptError::InvalidInput("FORKID signatures need the input value".to_string())
        })?;
        signature_hash_forkid(tx, input_index, redeem_script, value, sighash_flags)?
    } else {
        signature_hash_legacy(tx, input_index, redeem_script, sighash_flags)?
    };

    let mut signature = key.sign_digest(&digest);
    signature.push(sighash_flags.sighash_byte());

    let mut builder = Builder::new().push_slice(push_bytes(signature)?);
    if variant == TimeLockVariant::PayToPubKeyHash {
        builder = builder.push_key(&key.public_key);
    }
    Ok(builder
        .push_slice(push_bytes(redeem_script.to_bytes())?)
        .into_script())
}

// =============================================================================
// Decoding
// =============================================================================

/// Break a CLTV redeem script into its parts
pub fn parse_redeem_script(script: &Script) -> Result<RedeemScriptInfo, ScriptError> {
    let instructions = instructions(script)?;

    let lock_time = match instructions.first() {
        Some(Instruction::PushBytes(data)) => decode_script_num(data.as_bytes(), 5)?,
        _ => return Err(ScriptError::UnrecognizedTemplate),
    };
    let lock_time = u32::try_from(lock_time).map_err(|_| {
        ScriptError::Malformed(format!("lock time {} out of range", lock_time))
    })?;
    // Expiry is checked against the clock, so heights can't be honoured
    if LockTime::from_consensus(lock_time).is_block_height() {
        return Err(ScriptError::Malformed(format!(
            "lock time {} is a block height",
            lock_time
        )));
    }

    let locking_key = match &instructions[1..] {
        [Instruction::Op(cltv), Instruction::Op(drop), Instruction::PushBytes(key), Instruction::Op(checksig)]
            if [*cltv, *drop, *checksig] == [OP_CLTV, OP_DROP, OP_CHECKSIG] =>
        {
            PublicKey::from_slice(key.as_bytes())
                .map(LockingKey::PubKey)
                .map_err(|e| ScriptError::Malformed(format!("public key: {}", e)))?
        }
        [Instruction::Op(cltv), Instruction::Op(drop), Instruction::Op(dup), Instruction::Op(hash160), Instruction::PushBytes(hash), Instruction::Op(equalverify), Instruction::Op(checksig)]
            if [*cltv, *drop, *dup, *hash160, *equalverify, *checksig]
                == [OP_CLTV, OP_DROP, OP_DUP, OP_HASH160, OP_EQUALVERIFY, OP_CHECKSIG] =>
        {
            let hash: [u8; 20] = hash
                .as_bytes()
                .try_into()
                .map_err(|_| ScriptError::UnrecognizedTemplate)?;
            LockingKey::PubKeyHash(PubkeyHash::from_byte_array(hash))
        }
        _ => return Err(ScriptError::UnrecognizedTemplate),
    };

    let variant = match locking_key {
        LockingKey::PubKey(_) => TimeLockVariant::PayToPubKey,
        LockingKey::PubKeyHash(_) => TimeLockVariant::PayToPubKeyHash,
    };
    Ok(RedeemScriptInfo {
        variant,
        lock_time,
        locking_key,
    })
}

/// The lock time (Unix seconds) carried by the first push of a redeem script
pub fn lock_time_of(script: &Script) -> Result<u32, ScriptError> {
    parse_redeem_script(script).map(|info| info.lock_time)
}

/// Whether `key` can satisfy the locking clause of `script`
pub fn locking_key_matches(script: &Script, key: &KeyPair) -> Result<bool, ScriptError> {
    parse_redeem_script(script).map(|info| info.is_spendable_by(key))
}

// =============================================================================
// Tests
// =============================================================================
