//! Block explorer networking
//!
//! Turns several unreliable public block explorers into one dependable
//! service per chain.
//!
//! # Features
//! - One client per explorer API family (Insight, bitcore-node, rest.bitcoin.com)
//! - Capability-gated dispatch
//! - First-success racing with per-request timeouts
//! - Error aggregation with a most-relevant error

pub mod bitcore;
pub mod explorer;
pub mod http;
pub mod insight;
pub mod race;
pub mod rest;
pub mod service;

pub use bitcore::BitcoreClient;
pub use explorer::{ExplorerClient, ExplorerError};
pub use http::HttpClient;
pub use insight::InsightClient;
pub use race::{race_to_success, AggregateError};
pub use rest::RestClient;
pub use service::{BlockchainService, ServiceConfig, DEFAULT_TIMEOUT};
