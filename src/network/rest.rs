//! rest.bitcoin.com explorers
//!
//! Bitcoin Cash only: `/v2/address/utxo/{a}`,
//! `/v2/rawtransactions/sendRawTransaction/{hex}` and
//! `/v2/address/details/{a}`. No fee estimates.

use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;

use crate::core::chain::{Capabilities, ChainProfile, ExplorerDescriptor};
use crate::core::transaction::Utxo;
use crate::network::explorer::{
    address_for_request, canonical_address, ExplorerClient, ExplorerError,
};
use crate::network::http::HttpClient;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UtxoResponse {
    utxos: Vec<RestUtxo>,
    cash_address: Option<String>,
    script_pub_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RestUtxo {
    txid: String,
    vout: u32,
    amount: f64,
    satoshis: u64,
    #[serde(default)]
    confirmations: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailsResponse {
    balance_sat: u64,
}

/// Client for rest.bitcoin.com (or a compatible deployment)
pub struct RestClient {
    descriptor: &'static ExplorerDescriptor,
    chain: &'static ChainProfile,
    http: HttpClient,
}

impl RestClient {
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
        format!("{}/v2/{}", self.descriptor.url.trim_end_matches('/'), path)
    }
}

fn to_utxos(response: UtxoResponse, chain: &ChainProfile) -> Vec<Utxo> {
    let address = canonical_address(response.cash_address, chain);
    response
        .utxos
        .into_iter()
        .map(|u| Utxo {
            txid: u.txid,
            vout: u.vout,
            satoshis: u.satoshis,
            amount: u.amount,
            confirmations: u.confirmations,
            script: response.script_pub_key.clone(),
            address: address.clone(),
        })
        .collect()
}

impl ExplorerClient for RestClient {
    fn url(&self) -> &str {
        self.descriptor.url
    }

    fn capabilities(&self) -> Capabilities {
        self.descriptor.capabilities
    }

    fn get_utxos<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Vec<Utxo>, ExplorerError>> {
        async move {
            let address = address_for_request(address, self.chain, self.descriptor.address_format)?;
            let url = self.endpoint(&format!("address/utxo/{}", address));
            let response: UtxoResponse = self.http.get_json(&url).await?;
            Ok(to_utxos(response, self.chain))
        }
        .boxed()
    }

    fn broadcast_tx<'a>(&'a self, tx_hex: &'a str) -> BoxFuture<'a, Result<String, ExplorerError>> {
        async move {
            let url = self.endpoint(&format!("rawtransactions/sendRawTransaction/{}", tx_hex));
            // The answer is a bare JSON string
            self.http.get_json::<String>(&url).await
        }
        .boxed()
    }

    fn get_balance<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<u64, ExplorerError>> {
        async move {
            let address = address_for_request(address, self.chain, self.descriptor.address_format)?;
            let url = self.endpoint(&format!("address/details/{}", address));
            let response: DetailsResponse = self.http.get_json(&url).await?;
            Ok(response.balance_sat)
        }
        .boxed()
    }
}
