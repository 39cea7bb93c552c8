//! Core time-lock components
//!
//! This module contains the offline building blocks:
//! - Chain profiles (forks, networks, explorers)
//! - CLTV redeem scripts and signature scripts
//! - Transactions (legacy and FORKID signature hashes, UTXOs)
//! - Addresses (base58check and CashAddr)
//! - Fee rates and amounts
//! - Redeem packages

pub mod address;
pub mod chain;
pub mod fee;
pub mod package;
pub mod script;
pub mod transaction;

pub use address::{Address, AddressError, AddressKind};
pub use chain::{
    chain_by_id, chain_for, AddressFormat, Capabilities, ChainProfile, ExplorerDescriptor,
    ExplorerFamily, Fork, Network, SigHashFlags, ALL_CHAINS, BCH, BTC, TBCH, TBTC,
};
pub use fee::{
    btc_per_kb_to_sat_per_byte, btc_to_satoshis, format_coins, satoshis_to_btc, FeeRates,
    InvalidFeeRates, FEE_TARGET_BLOCKS, SATOSHIS_PER_COIN,
};
pub use package::{PackageError, RedeemPackage, PACKAGE_VERSION};
pub use script::{
    build_redeem_script, build_script_sig, estimate_tx_size, lock_time_of, locking_key_matches,
    parse_redeem_script, parse_script, script_to_string, ScriptError, TimeLockVariant,
};
pub use transaction::{
    bip143_signature_hash, signature_hash_forkid, signature_hash_legacy, total_value,
    TransactionBuilder, TransactionError, Utxo, SEQUENCE_LOCKTIME_ENABLED, TX_VERSION,
};
