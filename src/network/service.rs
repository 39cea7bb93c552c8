//! Per-chain explorer facade
//!
//! [`BlockchainService`] owns the explorer clients of one chain and sends
//! each request to every client able to answer it.

use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::chain::{Capabilities, ChainProfile, ExplorerDescriptor, ExplorerFamily};
use crate::core::fee::FeeRates;
use crate::core::transaction::Utxo;
use crate::network::bitcore::BitcoreClient;
use crate::network::explorer::{ExplorerClient, ExplorerError};
use crate::network::http::HttpClient;
use crate::network::insight::InsightClient;
use crate::network::race::{race_to_success, AggregateError};
use crate::network::rest::RestClient;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Explorer access configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Per-request timeout; a slower explorer counts as failed
    pub timeout: Duration,
    /// User-Agent sent with every request
    pub user_agent: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: format!("cltv-timelock/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn build_client(
    descriptor: &'static ExplorerDescriptor,
    chain: &'static ChainProfile,
    http: HttpClient,
) -> Arc<dyn ExplorerClient> {
    match descriptor.family {
        ExplorerFamily::Insight => Arc::new(InsightClient::new(descriptor, chain, http)),
        ExplorerFamily::Bitcore => Arc::new(BitcoreClient::new(descriptor, chain, http)),
        ExplorerFamily::BitcoinComRest => Arc::new(RestClient::new(descriptor, chain, http)),
    }
}

/// All explorers of one chain behind a single reliable interface
pub struct BlockchainService {
    chain: &'static ChainProfile,
    clients: Vec<Arc<dyn ExplorerClient>>,
    timeout: Duration,
}

impl BlockchainService {
    /// Build HTTP clients for every explorer listed in `chain`
    pub fn new(chain: &'static ChainProfile, config: &ServiceConfig) -> Result<Self, ExplorerError> {
        let http = HttpClient::new(config)?;
        let clients = chain
            .explorers
            .iter()
            .map(|descriptor| build_client(descriptor, chain, http.clone()))
            .collect();
        Ok(Self::with_clients(chain, clients, config.timeout))
    }

    /// Use an explicit set of clients
    pub fn with_clients(
        chain: &'static ChainProfile,
        clients: Vec<Arc<dyn ExplorerClient>>,
        timeout: Duration,
    ) -> Self {
        Self {
            chain,
            clients,
            timeout,
        }
    }

    pub fn chain(&self) -> &'static ChainProfile {
        self.chain
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Race `request` across every client declaring `capability`
    async fn dispatch<T, F>(
        &self,
        capability: Capabilities,
        operation: &'static str,
        request: F,
    ) -> Result<T, AggregateError>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn ExplorerClient>) -> BoxFuture<'static, Result<T, ExplorerError>>,
    {
        let capable: Vec<_> = self
            .clients
            .iter()
            .filter(|c| c.capabilities().contains(capability))
            .cloned()
            .collect();

        if capable.is_empty() {
            log::warn!("No {} explorer offers {}", self.chain.short_name, operation);
            return Err(AggregateError::single(ExplorerError::Unsupported(capability)));
        }

        log::debug!(
            "{} on {} via {} explorer(s)",
            operation,
            self.chain.short_name,
            capable.len()
        );

        let operations: Vec<_> = capable
            .into_iter()
            .map(|client| {
                let url = client.url().to_string();
                let fut = request(client);
                async move {
                    let result = fut.await;
                    if let Err(e) = &result {
                        log::warn!("{} failed at {}: {}", operation, url, e);
                    }
                    result
                }
            })
            .collect();

        race_to_success(operations, self.timeout).await
    }

    /// Unspent outputs of `address`
    pub async fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>, AggregateError> {
        let address = address.to_string();
        self.dispatch(Capabilities::UTXOS, "get_utxos", move |client| {
            let address = address.clone();
            async move { client.get_utxos(&address).await }.boxed()
        })
        .await
    }

    /// Fee rates in satoshis per byte
    pub async fn get_fee_rates(&self) -> Result<FeeRates, AggregateError> {
        self.dispatch(Capabilities::FEE_RATES, "get_fee_rates", |client| {
            async move { client.get_fee_rates().await }.boxed()
        })
        .await
    }

    /// Broadcast a serialized transaction, returning its id
    pub async fn broadcast_tx(&self, tx_hex: &str) -> Result<String, AggregateError> {
        let tx_hex = tx_hex.to_string();
        let txid = self
            .dispatch(Capabilities::BROADCAST, "broadcast_tx", move |client| {
                let tx_hex = tx_hex.clone();
                async move { client.broadcast_tx(&tx_hex).await }.boxed()
            })
            .await?;
        log::info!("Broadcast {} on {}", txid, self.chain.short_name);
        Ok(txid)
    }

    /// Confirmed balance of `address` in satoshis
    pub async fn get_balance(&self, address: &str) -> Result<u64, AggregateError> {
        let address = address.to_string();
        self.dispatch(Capabilities::BALANCE, "get_balance", move |client| {
            let address = address.clone();
            async move { client.get_balance(&address).await }.boxed()
        })
        .await
    }

    /// Price of one coin in US dollars
    pub async fn get_usd_rate(&self) -> Result<f64, AggregateError> {
        self.dispatch(Capabilities::USD_RATE, "get_usd_rate", |client| {
            async move { client.get_usd_rate().await }.boxed()
        })
        .await
    }
}

impl fmt::Debug for BlockchainService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockchainService")
            .field("chain", &self.chain.short_name)
            .field(
                "explorers",
                &self.clients.iter().map(|c| c.url()).collect::<Vec<_>>(),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::chain::{BCH, BTC};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted explorer used across the crate's tests
    pub(crate) struct MockExplorer {
        pub url: String,
        pub capabilities: Capabilities,
        pub utxos: Result<Vec<Utxo>, ExplorerError>,
        pub fee_rates: Result<FeeRates, ExplorerError>,
        pub broadcast: Result<String, ExplorerError>,
        pub balance: Result<u64, ExplorerError>,
        pub usd_rate: Result<f64, ExplorerError>,
        pub delay: Duration,
        pub utxo_calls: AtomicUsize,
        pub fee_calls: AtomicUsize,
        pub broadcast_calls: AtomicUsize,
        pub broadcasts: std::sync::Mutex<Vec<String>>,
    }

    impl MockExplorer {
        pub fn new(url: &str) -> Self {
            Self {
                url: url.to_string(),
                capabilities: Capabilities::all(),
                utxos: Ok(Vec::new()),
                fee_rates: Ok(FeeRates::flat(1.0)),
                broadcast: Ok("00".repeat(32)),
                balance: Ok(0),
                usd_rate: Ok(100.0),
                delay: Duration::ZERO,
                utxo_calls: AtomicUsize::new(0),
                fee_calls: AtomicUsize::new(0),
                broadcast_calls: AtomicUsize::new(0),
                broadcasts: std::sync::Mutex::new(Vec::new()),
            }
        }

        pub fn failing(url: &str, error: ExplorerError) -> Self {
            Self {
                utxos: Err(error.clone()),
                fee_rates: Err(error.clone()),
                broadcast: Err(error.clone()),
                balance: Err(error.clone()),
                usd_rate: Err(error),
                ..Self::new(url)
            }
        }

        fn respond<'a, T: Clone + Send + Sync + 'a>(
            &'a self,
            value: &'a Result<T, ExplorerError>,
        ) -> BoxFuture<'a, Result<T, ExplorerError>> {
            async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                value.clone()
            }
            .boxed()
        }
    }

    impl ExplorerClient for MockExplorer {
        fn url(&self) -> &str {
            &self.url
        }

        fn capabilities(&self) -> Capabilities {
            self.capabilities
        }

        fn get_utxos<'a>(&'a self, _address: &'a str) -> BoxFuture<'a, Result<Vec<Utxo>, ExplorerError>> {
            self.utxo_calls.fetch_add(1, Ordering::SeqCst);
            self.respond(&self.utxos)
        }

        fn get_fee_rates(&self) -> BoxFuture<'_, Result<FeeRates, ExplorerError>> {
            self.fee_calls.fetch_add(1, Ordering::SeqCst);
            self.respond(&self.fee_rates)
        }

        fn broadcast_tx<'a>(&'a self, tx_hex: &'a str) -> BoxFuture<'a, Result<String, ExplorerError>> {
            self.broadcast_calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut seen) = self.broadcasts.lock() {
                seen.push(tx_hex.to_string());
            }
            self.respond(&self.broadcast)
        }

        fn get_balance<'a>(&'a self, _address: &'a str) -> BoxFuture<'a, Result<u64, ExplorerError>> {
            self.respond(&self.balance)
        }

        fn get_usd_rate(&self) -> BoxFuture<'_, Result<f64, ExplorerError>> {
            self.respond(&self.usd_rate)
        }
    }

    fn service(chain: &'static ChainProfile, mocks: Vec<Arc<MockExplorer>>) -> BlockchainService {
        let clients = mocks
            .into_iter()
            .map(|m| m as Arc<dyn ExplorerClient>)
            .collect();
        BlockchainService::with_clients(chain, clients, Duration::from_secs(2))
    }

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.user_agent.starts_with("cltv-timelock/"));
    }

    #[test]
    fn test_builds_client_per_descriptor() {
        let service = BlockchainService::new(&BCH, &ServiceConfig::default()).unwrap();
        assert_eq!(service.clients.len(), BCH.explorers.len());
        assert_eq!(service.chain(), &BCH);
        let rest = service
            .clients
            .iter()
            .find(|c| c.url() == "https://rest.bitcoin.com")
            .unwrap();
        assert!(!rest.capabilities().contains(Capabilities::FEE_RATES));
    }

    #[tokio::test]
    async fn test_only_capable_clients_are_asked() {
        let mut no_fees = MockExplorer::new("no-fees");
        no_fees.capabilities = Capabilities::UTXOS | Capabilities::BROADCAST;
        let no_fees = Arc::new(no_fees);

        let mut fees = MockExplorer::new("fees");
        fees.fee_rates = Ok(FeeRates::flat(3.0));
        let fees = Arc::new(fees);

        let svc = service(&BTC, vec![Arc::clone(&no_fees), Arc::clone(&fees)]);
        assert_eq!(svc.get_fee_rates().await.unwrap(), FeeRates::flat(3.0));
        assert_eq!(no_fees.fee_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fees.fee_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_capability() {
        let mut mock = MockExplorer::new("utxo-only");
        mock.capabilities = Capabilities::UTXOS;
        let svc = service(&BTC, vec![Arc::new(mock)]);

        let err = svc.get_usd_rate().await.unwrap_err();
        assert_eq!(
            err.errors,
            vec![ExplorerError::Unsupported(Capabilities::USD_RATE)]
        );
    }

    #[tokio::test]
    async fn test_one_working_explorer_is_enough() {
        let broken = Arc::new(MockExplorer::failing(
            "broken",
            ExplorerError::Fetch("connection refused".to_string()),
        ));
        let mut working = MockExplorer::new("working");
        working.balance = Ok(12_345);
        working.delay = Duration::from_millis(20);
        let working = Arc::new(working);

        let svc = service(&BTC, vec![broken, working]);
        assert_eq!(svc.get_balance("1BpEi6DfDAUFd7GtittLSdBeYJvcoaVggu").await, Ok(12_345));
        assert_eq!(svc.get_usd_rate().await, Ok(100.0));
    }

    #[tokio::test]
    async fn test_broadcast_failure_aggregated() {
        let server = ExplorerError::Server {
            status: 400,
            body: "64: non-final".to_string(),
        };
        let svc = service(
            &BTC,
            vec![
                Arc::new(MockExplorer::failing("a", ExplorerError::Fetch("dns".to_string()))),
                Arc::new(MockExplorer::failing("b", server.clone())),
            ],
        );
        let err = svc.broadcast_tx("0100").await.unwrap_err();
        assert_eq!(err.errors.len(), 2);
        assert_eq!(err.most_relevant(), Some(&server));
    }
}
