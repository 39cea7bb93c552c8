//! Redeem packages
//!
//! The JSON document handed to the user when a time-locked address is
//! created. It holds everything needed to spend from the address later:
//!
//! ```json
//! {"version":1,"blockchain":"BCH","redeemKey":"<WIF>","redeemScript":"<script>"}
//! ```

use bitcoin::{Script, ScriptBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::chain::{chain_by_id, ChainProfile};
use crate::core::script::{parse_script, script_to_string};
use crate::crypto::KeyPair;

/// Package format written by this crate
pub const PACKAGE_VERSION: u32 = 1;

const REQUIRED_KEYS: [&str; 4] = ["version", "blockchain", "redeemKey", "redeemScript"];

/// Package-related errors
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Malformed redeem package: {0}")]
    MalformedData(String),
    #[error("Unknown chain: {0}")]
    UnknownChain(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Exported redeem data for one time-locked address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeemPackage {
    pub version: u32,
    /// Chain short name (`BTC`, `tBTC`, `BCH`, `tBCH`)
    pub blockchain: String,
    /// WIF private key
    #[serde(rename = "redeemKey")]
    pub redeem_key: String,
    /// Redeem script, human-readable or hex
    #[serde(rename = "redeemScript")]
    pub redeem_script: String,
}

impl RedeemPackage {
    pub fn new(chain: &ChainProfile, key: &KeyPair, script: &Script) -> Self {
        Self {
            version: PACKAGE_VERSION,
            blockchain: chain.short_name.to_string(),
            redeem_key: key.to_wif(chain.network),
            // Human-readable form; hex would be just as valid
            redeem_script: script_to_string(script),
        }
    }

    /// Parse package JSON, requiring all four keys
    pub fn from_json(json: &str) -> Result<Self, PackageError> {
        let value: serde_json::Value = serde_json::from_str(json.trim())
            .map_err(|e| PackageError::MalformedData(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| PackageError::MalformedData("expected a JSON object".to_string()))?;

        if let Some(missing) = REQUIRED_KEYS.iter().find(|k| !object.contains_key(**k)) {
            return Err(PackageError::MalformedData(format!("missing key {}", missing)));
        }

        serde_json::from_value(value).map_err(|e| PackageError::MalformedData(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, PackageError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, PackageError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn chain(&self) -> Result<&'static ChainProfile, PackageError> {
        chain_by_id(&self.blockchain).ok_or_else(|| PackageError::UnknownChain(self.blockchain.clone()))
    }

    pub fn script(&self) -> Result<ScriptBuf, PackageError> {
        parse_script(&self.redeem_script)
            .map_err(|e| PackageError::MalformedData(format!("redeem script: {}", e)))
    }

    pub fn key(&self) -> Result<KeyPair, PackageError> {
        KeyPair::from_wif(&self.redeem_key)
            .map(|(key, _)| key)
            .map_err(|e| PackageError::MalformedData(format!("redeem key: {}", e)))
    }
}
