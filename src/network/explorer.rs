//! Block explorer clients
//!
//! Every explorer API is wrapped in a type implementing [`ExplorerClient`].
//! Clients only implement the operations their API offers; the rest fall
//! back to the default bodies, which fail with `Unsupported`.

use futures::future::{self, BoxFuture, FutureExt};
use std::time::Duration;
use thiserror::Error;

use crate::core::address::Address;
use crate::core::chain::{AddressFormat, Capabilities, ChainProfile, Fork};
use crate::core::fee::{FeeRates, InvalidFeeRates};
use crate::core::transaction::Utxo;

/// Errors reported by a single explorer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExplorerError {
    /// The server answered with a non-success status
    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },
    /// The request never got an answer
    #[error("Network error: {0}")]
    Fetch(String),
    /// The answer couldn't be understood
    #[error("Unexpected response: {0}")]
    Unexpected(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Operation not supported: {0:?}")]
    Unsupported(Capabilities),
    /// The answer parsed but its contents are unusable
    #[error("Server returned invalid data: {0}")]
    ServerDataInvalid(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ExplorerError {
    /// Lower is more useful to show a user when every explorer failed
    pub fn relevance(&self) -> u8 {
        match self {
            ExplorerError::Server { .. } => 0,
            ExplorerError::Fetch(_) | ExplorerError::Timeout(_) => 1,
            _ => 2,
        }
    }
}

impl From<InvalidFeeRates> for ExplorerError {
    fn from(err: InvalidFeeRates) -> Self {
        ExplorerError::ServerDataInvalid(err.to_string())
    }
}

fn unsupported<'a, T: Send + 'a>(capability: Capabilities) -> BoxFuture<'a, Result<T, ExplorerError>> {
    future::ready(Err(ExplorerError::Unsupported(capability))).boxed()
}

/// One block explorer API
pub trait ExplorerClient: Send + Sync {
    /// Base URL, for logging
    fn url(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Unspent outputs of `address`
    fn get_utxos<'a>(&'a self, _address: &'a str) -> BoxFuture<'a, Result<Vec<Utxo>, ExplorerError>> {
        unsupported(Capabilities::UTXOS)
    }

    /// Fee rates in satoshis per byte, already corrected
    fn get_fee_rates(&self) -> BoxFuture<'_, Result<FeeRates, ExplorerError>> {
        unsupported(Capabilities::FEE_RATES)
    }

    /// Broadcast a serialized transaction, returning its id
    fn broadcast_tx<'a>(&'a self, _tx_hex: &'a str) -> BoxFuture<'a, Result<String, ExplorerError>> {
        unsupported(Capabilities::BROADCAST)
    }

    /// Confirmed balance of `address` in satoshis
    fn get_balance<'a>(&'a self, _address: &'a str) -> BoxFuture<'a, Result<u64, ExplorerError>> {
        unsupported(Capabilities::BALANCE)
    }

    /// Price of one coin in US dollars
    fn get_usd_rate(&self) -> BoxFuture<'_, Result<f64, ExplorerError>> {
        unsupported(Capabilities::USD_RATE)
    }
}

/// Render `address` the way an explorer with `format` expects it
pub(crate) fn address_for_request(
    address: &str,
    chain: &ChainProfile,
    format: AddressFormat,
) -> Result<String, ExplorerError> {
    let parsed =
        Address::parse(address, chain).map_err(|e| ExplorerError::InvalidRequest(e.to_string()))?;
    Ok(match (chain.fork, format) {
        (Fork::Bch, AddressFormat::CashAddr) => parsed.to_cashaddr(),
        _ => parsed.to_legacy(),
    })
}

/// Canonical form of an address returned by an explorer
///
/// Some BCH explorers answer with legacy addresses even when queried with
/// CashAddr. Unparseable addresses are passed through untouched.
pub(crate) fn canonical_address(address: Option<String>, chain: &ChainProfile) -> Option<String> {
    address.map(|a| match Address::parse(&a, chain) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => a,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chain::{BCH, BTC};

    const LEGACY: &str = "1BpEi6DfDAUFd7GtittLSdBeYJvcoaVggu";
    const CASH: &str = "bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a";

    struct Bare;

    impl ExplorerClient for Bare {
        fn url(&self) -> &str {
            "bare"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::empty()
        }
    }

    #[tokio::test]
    async fn test_default_bodies_are_unsupported() {
        let client = Bare;
        assert_eq!(
            client.get_utxos(LEGACY).await,
            Err(ExplorerError::Unsupported(Capabilities::UTXOS))
        );
        assert_eq!(
            client.get_fee_rates().await,
            Err(ExplorerError::Unsupported(Capabilities::FEE_RATES))
        );
        assert_eq!(
            client.broadcast_tx("00").await,
            Err(ExplorerError::Unsupported(Capabilities::BROADCAST))
        );
        assert_eq!(
            client.get_balance(LEGACY).await,
            Err(ExplorerError::Unsupported(Capabilities::BALANCE))
        );
        assert_eq!(
            client.get_usd_rate().await,
            Err(ExplorerError::Unsupported(Capabilities::USD_RATE))
        );
    }

    #[test]
    fn test_relevance_order() {
        let server = ExplorerError::Server {
            status: 500,
            body: "boom".to_string(),
        };
        assert!(server.relevance() < ExplorerError::Fetch("x".to_string()).relevance());
        assert_eq!(
            ExplorerError::Timeout(Duration::from_secs(1)).relevance(),
            ExplorerError::Fetch("x".to_string()).relevance()
        );
        assert!(
            ExplorerError::Fetch("x".to_string()).relevance()
                < ExplorerError::Unexpected("x".to_string()).relevance()
        );
    }

    #[test]
    fn test_address_for_request() {
        assert_eq!(
            address_for_request(CASH, &BCH, AddressFormat::Legacy).unwrap(),
            LEGACY
        );
        assert_eq!(
            address_for_request(LEGACY, &BCH, AddressFormat::CashAddr).unwrap(),
            CASH
        );
        assert_eq!(
            address_for_request(LEGACY, &BTC, AddressFormat::CashAddr).unwrap(),
            LEGACY
        );
        assert!(matches!(
            address_for_request("garbage", &BTC, AddressFormat::Legacy),
            Err(ExplorerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_canonical_address() {
        assert_eq!(
            canonical_address(Some(LEGACY.to_string()), &BCH),
            Some(CASH.to_string())
        );
        assert_eq!(
            canonical_address(Some(LEGACY.to_string()), &BTC),
            Some(LEGACY.to_string())
        );
        assert_eq!(
            canonical_address(Some("???".to_string()), &BTC),
            Some("???".to_string())
        );
        assert_eq!(canonical_address(None, &BTC), None);
    }
}
