//! Address encoding
//!
//! Base58check (legacy) addresses for both forks, encoded by `bitcoin`, and
//! CashAddr for Bitcoin Cash. Parsing is always checked against a chain
//! profile so a testnet address can't slip into a mainnet transaction.

use bitcoin::address::NetworkUnchecked;
use bitcoin::hashes::Hash;
use bitcoin::{PubkeyHash, Script, ScriptBuf, ScriptHash};
use std::fmt;
use thiserror::Error;

use crate::core::chain::{chain_for, ChainProfile, Fork, Network};

/// Address-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AddressError {
    #[error("Invalid address encoding: {0}")]
    InvalidEncoding(String),
    #[error("Invalid address checksum")]
    InvalidChecksum,
    #[error("Unknown address version 0x{0:02x}")]
    UnknownVersion(u8),
    #[error("Address is for {found:?}, expected {expected:?}")]
    WrongNetwork { expected: Network, found: Network },
    #[error("CashAddr is not valid on {0}")]
    CashAddrNotSupported(&'static str),
    #[error("Only P2PKH and P2SH addresses are supported: {0}")]
    UnsupportedType(String),
}

/// What the 20-byte payload commits to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    PubKeyHash,
    ScriptHash,
}

/// A decoded address bound to one chain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub kind: AddressKind,
    pub hash: [u8; 20],
    pub fork: Fork,
    pub network: Network,
}

impl Address {
    /// Pay-to-script-hash address of `script` on `chain`
    pub fn p2sh(script: &Script, chain: &ChainProfile) -> Self {
        Self {
            kind: AddressKind::ScriptHash,
            hash: script.script_hash().to_byte_array(),
            fork: chain.fork,
            network: chain.network,
        }
    }

    /// Pay-to-pubkey-hash address on `chain`
    pub fn p2pkh(pubkey_hash: PubkeyHash, chain: &ChainProfile) -> Self {
        Self {
            kind: AddressKind::PubKeyHash,
            hash: pubkey_hash.to_byte_array(),
            fork: chain.fork,
            network: chain.network,
        }
    }

    /// Parse an address and check it belongs to `chain`
    ///
    /// Both forks accept base58; Bitcoin Cash also accepts CashAddr with or
    /// without its prefix.
    pub fn parse(s: &str, chain: &ChainProfile) -> Result<Self, AddressError> {
        let s = s.trim();
        let (kind, hash, network) = if looks_like_cashaddr(s) {
            if chain.fork != Fork::Bch {
                return Err(AddressError::CashAddrNotSupported(chain.short_name));
            }
            let default_prefix = chain.network.cashaddr_prefix();
            let (kind, hash, prefix) = cashaddr::decode(s, default_prefix)?;
            let network = network_for_cashaddr_prefix(&prefix)?;
            (kind, hash, network)
        } else {
            decode_base58(s)?
        };

        if network != chain.network {
            return Err(AddressError::WrongNetwork {
                expected: chain.network,
                found: network,
            });
        }

        Ok(Self {
            kind,
            hash,
            fork: chain.fork,
            network,
        })
    }

    /// Work out which chain an address string belongs to
    ///
    /// Base58 addresses are shared by both forks and resolve to Bitcoin;
    /// CashAddr resolves to Bitcoin Cash.
    pub fn detect(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        if looks_like_cashaddr(s) {
            let lower = s.to_ascii_lowercase();
            let prefix = match lower.split_once(':') {
                Some((prefix, _)) => prefix.to_string(),
                None => Network::Mainnet.cashaddr_prefix().to_string(),
            };
            let network = network_for_cashaddr_prefix(&prefix)?;
            return Self::parse(s, chain_for(Fork::Bch, network));
        }

        let (kind, hash, network) = decode_base58(s)?;
        Ok(Self {
            kind,
            hash,
            fork: Fork::Btc,
            network,
        })
    }

    pub fn chain(&self) -> &'static ChainProfile {
        chain_for(self.fork, self.network)
    }

    /// Base58check form
    pub fn to_legacy(&self) -> String {
        let kind = self.network.network_kind();
        let address = match self.kind {
            AddressKind::PubKeyHash => {
                bitcoin::Address::p2pkh(PubkeyHash::from_byte_array(self.hash), kind)
            }
            AddressKind::ScriptHash => {
                bitcoin::Address::p2sh_from_hash(ScriptHash::from_byte_array(self.hash), kind)
            }
        };
        address.to_string()
    }

    /// CashAddr form including the network prefix
    pub fn to_cashaddr(&self) -> String {
        cashaddr::encode(self.network.cashaddr_prefix(), self.kind, &self.hash)
    }

    /// Output script paying to this address
    pub fn script_pubkey(&self) -> ScriptBuf {
        match self.kind {
            AddressKind::PubKeyHash => {
                ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(self.hash))
            }
            AddressKind::ScriptHash => {
                ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(self.hash))
            }
        }
    }
}

impl fmt::Display for Address {
    /// Canonical form for the address's fork
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fork {
            Fork::Btc => write!(f, "{}", self.to_legacy()),
            Fork::Bch => write!(f, "{}", self.to_cashaddr()),
        }
    }
}

fn looks_like_cashaddr(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    if lower.contains(':') {
        return true;
    }
    // Unprefixed CashAddr payloads are 42 chars and start with q or p
    lower.len() == 42 && (lower.starts_with('q') || lower.starts_with('p'))
}

fn network_for_cashaddr_prefix(prefix: &str) -> Result<Network, AddressError> {
    [Network::Mainnet, Network::Testnet]
        .into_iter()
        .find(|n| n.cashaddr_prefix() == prefix)
        .ok_or_else(|| AddressError::InvalidEncoding(format!("unknown prefix {}", prefix)))
}

/// Base58 P2PKH or P2SH address, with the network its prefix belongs to
fn decode_base58(s: &str) -> Result<(AddressKind, [u8; 20], Network), AddressError> {
    let unchecked = s
        .parse::<bitcoin::Address<NetworkUnchecked>>()
        .map_err(|e| AddressError::InvalidEncoding(e.to_string()))?;
    let network = [Network::Mainnet, Network::Testnet]
        .into_iter()
        .find(|n| unchecked.is_valid_for_network(n.bitcoin_network()))
        .ok_or_else(|| AddressError::InvalidEncoding(format!("unknown network for {}", s)))?;

    let script_pubkey = unchecked.assume_checked().script_pubkey();
    let bytes = script_pubkey.as_bytes();
    let (kind, payload) = if script_pubkey.is_p2pkh() {
        (AddressKind::PubKeyHash, &bytes[3..23])
    } else if script_pubkey.is_p2sh() {
        (AddressKind::ScriptHash, &bytes[2..22])
    } else {
        return Err(AddressError::UnsupportedType(s.to_string()));
    };

    let mut hash = [0u8; 20];
    hash.copy_from_slice(payload);
    Ok((kind, hash, network))
}

// =============================================================================
// CashAddr
// =============================================================================

pub mod cashaddr {
    use super::{AddressError, AddressKind};

    const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
    const GENERATORS: [u64; 5] = [
        0x98f2bc8e61,
        0x79b76d99e2,
        0xf33e5fb3c4,
        0xae2eabe2a8,
        0x1e4f43e470,
    ];

    /// Version byte: type in bits 3..7, size code 0 (160-bit hash)
    fn version_byte(kind: AddressKind) -> u8 {
        match kind {
            AddressKind::PubKeyHash => 0x00,
            AddressKind::ScriptHash => 0x08,
        }
    }

    fn polymod(values: &[u8]) -> u64 {
        let mut c: u64 = 1;
        for d in values {
            let c0 = (c >> 35) as u8;
            c = ((c & 0x07_ffff_ffff) << 5) ^ (*d as u64);
            for (i, generator) in GENERATORS.iter().enumerate() {
                if c0 & (1 << i) != 0 {
                    c ^= generator;
                }
            }
        }
        c ^ 1
    }

    fn prefix_values(prefix: &str) -> Vec<u8> {
        let mut values: Vec<u8> = prefix.bytes().map(|b| b & 0x1f).collect();
        values.push(0);
        values
    }

    /// Regroup bits, e.g. 8-bit bytes into 5-bit words
    fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Option<Vec<u8>> {
        let mut acc: u32 = 0;
        let mut bits: u32 = 0;
        let max_value = (1u32 << to) - 1;
        let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);

        for value in data {
            let v = *value as u32;
            if v >> from != 0 {
                return None;
            }
            acc = (acc << from) | v;
            bits += from;
            while bits >= to {
                bits -= to;
                out.push(((acc >> bits) & max_value) as u8);
            }
        }

        if pad {
            if bits > 0 {
                out.push(((acc << (to - bits)) & max_value) as u8);
            }
        } else if bits >= from || ((acc << (to - bits)) & max_value) != 0 {
            return None;
        }
        Some(out)
    }

    pub fn encode(prefix: &str, kind: AddressKind, hash: &[u8; 20]) -> String {
        let mut payload = Vec::with_capacity(21);
        payload.push(version_byte(kind));
        payload.extend_from_slice(hash);
        // 8 -> 5 with padding never fails
        let data = convert_bits(&payload, 8, 5, true).unwrap_or_default();

        let mut checksum_input = prefix_values(prefix);
        checksum_input.extend_from_slice(&data);
        checksum_input.extend_from_slice(&[0u8; 8]);
        let checksum = polymod(&checksum_input);

        let mut out = String::with_capacity(prefix.len() + 1 + data.len() + 8);
        out.push_str(prefix);
        out.push(':');
        for d in &data {
            out.push(CHARSET[*d as usize] as char);
        }
        for i in 0..8 {
            let d = (checksum >> (5 * (7 - i))) & 0x1f;
            out.push(CHARSET[d as usize] as char);
        }
        out
    }

    /// Decode a CashAddr string, returning the payload and the prefix used
    pub fn decode(
        s: &str,
        default_prefix: &str,
    ) -> Result<(AddressKind, [u8; 20], String), AddressError> {
        let has_lower = s.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = s.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper {
            return Err(AddressError::InvalidEncoding("mixed case".to_string()));
        }
        let s = s.to_ascii_lowercase();

        let (prefix, body) = match s.split_once(':') {
            Some((prefix, body)) => (prefix.to_string(), body),
            None => (default_prefix.to_string(), s.as_str()),
        };
        if body.len() < 8 {
            return Err(AddressError::InvalidEncoding("payload too short".to_string()));
        }

        let mut values = Vec::with_capacity(body.len());
        for c in body.bytes() {
            let v = CHARSET
                .iter()
                .position(|x| *x == c)
                .ok_or_else(|| AddressError::InvalidEncoding(format!("bad character {}", c as char)))?;
            values.push(v as u8);
        }

        let mut checksum_input = prefix_values(&prefix);
        checksum_input.extend_from_slice(&values);
        if polymod(&checksum_input) != 0 {
            return Err(AddressError::InvalidChecksum);
        }

        let data = &values[..values.len() - 8];
        let payload = convert_bits(data, 5, 8, false)
            .ok_or_else(|| AddressError::InvalidEncoding("bad padding".to_string()))?;
        if payload.len() != 21 {
            return Err(AddressError::InvalidEncoding(format!(
                "expected 21 payload bytes, got {}",
                payload.len()
            )));
        }

        let kind = match payload[0] {
            0x00 => AddressKind::PubKeyHash,
            0x08 => AddressKind::ScriptHash,
            v => return Err(AddressError::UnknownVersion(v)),
        };
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);
        Ok((kind, hash, prefix))
    }
}
