//! CLTV Time-Lock: time-locked P2SH addresses for Bitcoin and Bitcoin Cash
//!
//! This crate provides everything needed to lock coins until a point in time:
//! - CHECKLOCKTIMEVERIFY redeem scripts (pay-to-pubkey and pay-to-pubkey-hash)
//! - Legacy and replay-protected (FORKID) transaction signing
//! - Base58check and CashAddr addresses
//! - Portable redeem packages (JSON)
//! - Public block explorer access with first-success racing
//! - A redemption flow with user confirmation before broadcasting
//!
//! # Example
//!
//! ```rust
//! use cltv_timelock::core::{lock_time_of, TimeLockVariant, BTC};
//! use cltv_timelock::wallet::create_locked_address;
//!
//! // Lock coins until 2030-01-01
//! let locked = create_locked_address(&BTC, 1_893_456_000, TimeLockVariant::PayToPubKeyHash).unwrap();
//! println!("Send coins to: {}", locked.address);
//!
//! // The package is all that's needed to redeem later
//! let script = locked.package.script().unwrap();
//! assert_eq!(lock_time_of(&script).unwrap(), 1_893_456_000);
//! println!("{}", locked.package.to_json_pretty().unwrap());
//! ```

pub mod cli;
pub mod core;
pub mod crypto;
pub mod network;
pub mod wallet;

// Re-export commonly used types
pub use core::{Address, ChainProfile, FeeRates, RedeemPackage, TimeLockVariant, ALL_CHAINS};
pub use crypto::KeyPair;
pub use network::{BlockchainService, ExplorerClient, ServiceConfig};
pub use wallet::{
    create_locked_address, RedeemError, RedeemOutcome, RedeemPrompt, TimeLockService,
};
