//! Insight API explorers
//!
//! `/api/addr/{address}/utxo`, `/api/utils/estimatefee?nbBlocks=n`,
//! `/api/tx/send`, `/api/addr/{address}/balance` and `/api/currency`.

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::chain::{Capabilities, ChainProfile, ExplorerDescriptor};
use crate::core::fee::{btc_per_kb_to_sat_per_byte, btc_to_satoshis, FeeRates, FEE_TARGET_BLOCKS};
use crate::core::transaction::Utxo;
use crate::network::explorer::{
    address_for_request, canonical_address, ExplorerClient, ExplorerError,
};
use crate::network::http::HttpClient;

#[derive(Debug, Deserialize)]
struct InsightUtxo {
    txid: String,
    vout: u32,
    amount: f64,
    /// Older servers only report `amount`
    satoshis: Option<u64>,
    #[serde(default)]
    confirmations: u64,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    rawtx: &'a str,
}

/// Servers disagree on whether the txid is wrapped
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SentTxid {
    Plain(String),
    Wrapped { result: String },
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    txid: SentTxid,
}

#[derive(Debug, Deserialize)]
struct CurrencyResponse {
    data: HashMap<String, f64>,
}

/// Client for one Insight server
pub struct InsightClient {
    descriptor: &'static ExplorerDescriptor,
    chain: &'static ChainProfile,
    http: HttpClient,
}

impl InsightClient {
    pub fn new(
        descriptor: &'static ExplorerDescriptor,
        chain: &'static ChainProfile,
        http: HttpClient,
    ) -> Self {
        Self {
            descriptor,
            chain,
            http,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.descriptor.url.trim_end_matches('/'), path)
    }

    async fn estimate_fee(&self, blocks: u32) -> Result<f64, ExplorerError> {
        let url = self.endpoint(&format!("utils/estimatefee?nbBlocks={}", blocks));
        let response: HashMap<String, f64> = self.http.get_json(&url).await?;
        fee_for_target(&response, blocks)
    }
}

/// The estimate is keyed by the requested block count
fn fee_for_target(response: &HashMap<String, f64>, blocks: u32) -> Result<f64, ExplorerError> {
    response
        .get(&blocks.to_string())
        .copied()
        .ok_or_else(|| ExplorerError::Unexpected(format!("no estimate for {} blocks", blocks)))
}

fn to_utxo(raw: InsightUtxo, chain: &ChainProfile) -> Utxo {
    Utxo {
        satoshis: raw
            .satoshis
            .unwrap_or_else(|| btc_to_satoshis(raw.amount).max(0.0) as u64),
        txid: raw.txid,
        vout: raw.vout,
        amount: raw.amount,
        confirmations: raw.confirmations,
        script: raw.script_pub_key,
        address: canonical_address(raw.address, chain),
    }
}

/// Bitstamp is preferred when a server lists several sources
fn usd_rate(response: CurrencyResponse) -> Result<f64, ExplorerError> {
    response
        .data
        .get("bitstamp")
        .copied()
        .or_else(|| response.data.values().copied().find(|r| *r > 0.0))
        .filter(|r| *r > 0.0)
        .ok_or_else(|| ExplorerError::ServerDataInvalid("no USD rate".to_string()))
}

impl ExplorerClient for InsightClient {
    fn url(&self) -> &str {
        self.descriptor.url
    }

    fn capabilities(&self) -> Capabilities {
        self.descriptor.capabilities
    }

    fn get_utxos<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Vec<Utxo>, ExplorerError>> {
        async move {
            let address = address_for_request(address, self.chain, self.descriptor.address_format)?;
            let url = self.endpoint(&format!("addr/{}/utxo", address));
            let raw: Vec<InsightUtxo> = self.http.get_json(&url).await?;
            Ok(raw.into_iter().map(|u| to_utxo(u, self.chain)).collect())
        }
        .boxed()
    }

    fn get_fee_rates(&self) -> BoxFuture<'_, Result<FeeRates, ExplorerError>> {
        async move {
            let [high, medium, low] = FEE_TARGET_BLOCKS;
            let (high, medium, low) = futures::try_join!(
                self.estimate_fee(high),
                self.estimate_fee(medium),
                self.estimate_fee(low)
            )?;
            Ok(FeeRates::corrected(
                btc_per_kb_to_sat_per_byte(high),
                btc_per_kb_to_sat_per_byte(medium),
                btc_per_kb_to_sat_per_byte(low),
            )?)
        }
        .boxed()
    }

    fn broadcast_tx<'a>(&'a self, tx_hex: &'a str) -> BoxFuture<'a, Result<String, ExplorerError>> {
        async move {
            let url = self.endpoint("tx/send");
            let response: SendResponse = self
                .http
                .post_json(&url, &SendRequest { rawtx: tx_hex })
                .await?;
            Ok(match response.txid {
                SentTxid::Plain(txid) => txid,
                SentTxid::Wrapped { result } => result,
            })
        }
        .boxed()
    }

    fn get_balance<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<u64, ExplorerError>> {
        async move {
            let address = address_for_request(address, self.chain, self.descriptor.address_format)?;
            let url = self.endpoint(&format!("addr/{}/balance", address));
            self.http.get_json(&url).await
        }
        .boxed()
    }

    fn get_usd_rate(&self) -> BoxFuture<'_, Result<f64, ExplorerError>> {
        async move {
            let response: CurrencyResponse = self.http.get_json(&self.endpoint("currency")).await?;
            usd_rate(response)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chain::BCH;
    use crate::network::http::decode_body;

    #[test]
    fn test_utxo_parsing() {
        let body = r#"[{
            "address": "1BpEi6DfDAUFd7GtittLSdBeYJvcoaVggu",
            "txid": "3f4fa19803dec4d6a84fae3821da7ac7577080ef75451294e71f9b20e0ab1e7b",
            "vout": 0,
            "scriptPubKey": "76a91476a04053bda0a88bda5177b86a15c3b29f55987388ac",
            "amount": 0.0005,
            "satoshis": 50000,
            "height": 540000,
            "confirmations": 12
        }, {
            "txid": "3f4fa19803dec4d6a84fae3821da7ac7577080ef75451294e71f9b20e0ab1e7b",
            "vout": 1,
            "amount": 0.00012345
        }]"#;
        let raw: Vec<InsightUtxo> = decode_body(body).unwrap();
        let utxos: Vec<Utxo> = raw.into_iter().map(|u| to_utxo(u, &BCH)).collect();

        assert_eq!(utxos[0].satoshis, 50_000);
        assert_eq!(utxos[0].confirmations, 12);
        assert_eq!(
            utxos[0].address.as_deref(),
            Some("bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a")
        );
        assert_eq!(utxos[1].satoshis, 12_345);
        assert_eq!(utxos[1].confirmations, 0);
    }

    #[test]
    fn test_fee_response_keyed_by_target() {
        let response: HashMap<String, f64> = decode_body(r#"{"4": 0.00012}"#).unwrap();
        assert_eq!(fee_for_target(&response, 4).unwrap(), 0.00012);
        assert!(matches!(
            fee_for_target(&response, 2),
            Err(ExplorerError::Unexpected(_))
        ));
    }

    #[test]
    fn test_send_response_shapes() {
        let plain: SendResponse = decode_body(r#"{"txid":"abc"}"#).unwrap();
        assert!(matches!(plain.txid, SentTxid::Plain(ref t) if t == "abc"));

        let wrapped: SendResponse = decode_body(r#"{"txid":{"result":"def"}}"#).unwrap();
        assert!(matches!(wrapped.txid, SentTxid::Wrapped { ref result } if result == "def"));
    }

    #[test]
    fn test_usd_rate() {
        let response: CurrencyResponse =
            decode_body(r#"{"status":200,"data":{"bitstamp":6543.21}}"#).unwrap();
        assert_eq!(usd_rate(response).unwrap(), 6543.21);

        let response: CurrencyResponse = decode_body(r#"{"data":{"kraken":100.5}}"#).unwrap();
        assert_eq!(usd_rate(response).unwrap(), 100.5);

        let response: CurrencyResponse = decode_body(r#"{"data":{}}"#).unwrap();
        assert!(matches!(
            usd_rate(response),
            Err(ExplorerError::ServerDataInvalid(_))
        ));
    }
}
