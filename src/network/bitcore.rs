//! bitcore-node explorers
//!
//! Routes live under `/api/{CHAIN}/{network}`: `address/{a}/?unspent=true`,
//! `fee/{n}`, `tx/send` and `address/{a}/balance`. Values are reported in
//! satoshis.

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::core::chain::{Capabilities, ChainProfile, ExplorerDescriptor};
use crate::core::fee::{btc_per_kb_to_sat_per_byte, satoshis_to_btc, FeeRates, FEE_TARGET_BLOCKS};
use crate::core::transaction::Utxo;
use crate::network::explorer::{
    address_for_request, canonical_address, ExplorerClient, ExplorerError,
};
use crate::network::http::HttpClient;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Coin {
    mint_txid: String,
    mint_index: u32,
    value: u64,
    /// -1 while unconfirmed
    #[serde(default)]
    confirmations: i64,
    script: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeeResponse {
    feerate: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    raw_tx: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    txid: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    confirmed: u64,
}

/// Client for one bitcore-node server
pub struct BitcoreClient {
    descriptor: &'static ExplorerDescriptor,
    chain: &'static ChainProfile,
    http: HttpClient,
}

impl BitcoreClient {
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
        format!(
            "{}/api/{}/{}/{}",
            self.descriptor.url.trim_end_matches('/'),
            self.chain.unit(),
            self.chain.network.api_name(),
            path
        )
    }

    async fn estimate_fee(&self, blocks: u32) -> Result<f64, ExplorerError> {
        let response: FeeResponse = self.http.get_json(&self.endpoint(&format!("fee/{}", blocks))).await?;
        Ok(btc_per_kb_to_sat_per_byte(response.feerate))
    }
}

fn to_utxo(coin: Coin, chain: &ChainProfile) -> Utxo {
    Utxo {
        txid: coin.mint_txid,
        vout: coin.mint_index,
        satoshis: coin.value,
        amount: satoshis_to_btc(coin.value),
        confirmations: coin.confirmations.max(0) as u64,
        script: coin.script,
        address: canonical_address(coin.address, chain),
    }
}

impl ExplorerClient for BitcoreClient {
    fn url(&self) -> &str {
        self.descriptor.url
    }

    fn capabilities(&self) -> Capabilities {
        self.descriptor.capabilities
    }

    fn get_utxos<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Vec<Utxo>, ExplorerError>> {
        async move {
            let address = address_for_request(address, self.chain, self.descriptor.address_format)?;
            let url = self.endpoint(&format!("address/{}/?unspent=true", address));
            let coins: Vec<Coin> = self.http.get_json(&url).await?;
            Ok(coins.into_iter().map(|c| to_utxo(c, self.chain)).collect())
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
            Ok(FeeRates::corrected(high, medium, low)?)
        }
        .boxed()
    }

    fn broadcast_tx<'a>(&'a self, tx_hex: &'a str) -> BoxFuture<'a, Result<String, ExplorerError>> {
        async move {
            let response: SendResponse = self
                .http
                .post_json(&self.endpoint("tx/send"), &SendRequest { raw_tx: tx_hex })
                .await?;
            Ok(response.txid)
        }
        .boxed()
    }

    fn get_balance<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<u64, ExplorerError>> {
        async move {
            let address = address_for_request(address, self.chain, self.descriptor.address_format)?;
            let url = self.endpoint(&format!("address/{}/balance", address));
            let response: BalanceResponse = self.http.get_json(&url).await?;
            Ok(response.confirmed)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chain::{BTC, TBCH};
    use crate::network::http::decode_body;
    use crate::network::service::ServiceConfig;

    #[test]
    fn test_endpoint_layout() {
        let http = HttpClient::new(&ServiceConfig::default()).unwrap();
        let descriptor = TBCH
            .explorers
            .iter()
            .find(|e| e.family == crate::core::chain::ExplorerFamily::Bitcore)
            .unwrap();
        let client = BitcoreClient::new(descriptor, &TBCH, http);
        assert_eq!(
            client.endpoint("fee/2"),
            "https://api.bitcore.io/api/BCH/testnet/fee/2"
        );
        assert!(!client.capabilities().contains(Capabilities::USD_RATE));
    }

    #[test]
    fn test_coin_parsing() {
        let body = r#"[{
            "_id": "5b5a",
            "chain": "BTC",
            "network": "mainnet",
            "coinbase": false,
            "mintIndex": 2,
            "spentTxid": "",
            "mintTxid": "3f4fa19803dec4d6a84fae3821da7ac7577080ef75451294e71f9b20e0ab1e7b",
            "mintHeight": -1,
            "spentHeight": -2,
            "address": "1BpEi6DfDAUFd7GtittLSdBeYJvcoaVggu",
            "script": "76a91476a04053bda0a88bda5177b86a15c3b29f55987388ac",
            "value": 150000000,
            "confirmations": -1
        }]"#;
        let coins: Vec<Coin> = decode_body(body).unwrap();
        let utxo = to_utxo(coins.into_iter().next().unwrap(), &BTC);
        assert_eq!(utxo.vout, 2);
        assert_eq!(utxo.satoshis, 150_000_000);
        assert_eq!(utxo.amount, 1.5);
        assert_eq!(utxo.confirmations, 0);
        assert_eq!(utxo.address.as_deref(), Some("1BpEi6DfDAUFd7GtittLSdBeYJvcoaVggu"));
    }

    #[test]
    fn test_fee_and_balance_parsing() {
        let fee: FeeResponse = decode_body(r#"{"feerate":0.00002,"blocks":2}"#).unwrap();
        assert_eq!(btc_per_kb_to_sat_per_byte(fee.feerate), 2.0);

        let balance: BalanceResponse =
            decode_body(r#"{"confirmed":1000,"unconfirmed":50,"balance":1050}"#).unwrap();
        assert_eq!(balance.confirmed, 1000);
    }
}
