//! Time-locked addresses
//!
//! Creating a time-locked address is purely local: a fresh key, a CLTV
//! redeem script and its P2SH address. Redeeming goes through the block
//! explorers of the package's chain and moves every unspent output to a
//! single destination.

use bitcoin::{Script, Transaction};
use chrono::{TimeZone, Utc};
use std::fmt;
use thiserror::Error;

use crate::core::address::{Address, AddressError};
use crate::core::chain::{chain_by_id, ChainProfile};
use crate::core::fee::{format_coins, FeeRates};
use crate::core::package::{PackageError, RedeemPackage};
use crate::core::script::{
    build_redeem_script, build_script_sig, estimate_tx_size, parse_redeem_script, ScriptError,
    TimeLockVariant,
};
use crate::core::transaction::{
    to_hex, total_value, txid_hex, TransactionBuilder, TransactionError, Utxo,
    SEQUENCE_LOCKTIME_ENABLED,
};
use crate::crypto::KeyPair;
use crate::network::{AggregateError, BlockchainService, ExplorerError, ServiceConfig};

// =============================================================================
// Constants
// =============================================================================

/// Earliest accepted lock time, 2010-01-01T00:00:00Z
pub const MIN_LOCK_TIME: i64 = 1_262_304_000;

/// First rejected lock time, 2106-01-01T00:00:00Z
pub const MAX_LOCK_TIME: i64 = 4_291_747_200;

// =============================================================================
// Errors
// =============================================================================

/// Errors while creating, redeeming or inspecting time-locked addresses
#[derive(Error, Debug)]
pub enum RedeemError {
    #[error("Invalid blockchain type: \"{0}\"")]
    InvalidChain(String),
    #[error("The destination address is invalid. ({0})")]
    InvalidAddress(AddressError),
    #[error("Malformed redeem data. Did you copy it correctly? ({0})")]
    MalformedData(String),
    #[error("Lock time {0} is outside the supported range (2010-01-01 to 2106-01-01)")]
    InvalidLockTime(i64),
    #[error("Invalid fee rate: {0} sat/B")]
    InvalidFeeRate(f64),
    #[error("Error redeeming coins: the time-locked address has no coins to spend.")]
    NoBalance,
    #[error("Error while getting unspent transaction outputs: {0}")]
    Utxos(AggregateError),
    #[error("Error while getting fee rates: {0}")]
    FeeRates(AggregateError),
    #[error("Insufficient funds: {total} satoshis available but the fee is {fee}")]
    InsufficientFunds { total: u64, fee: u64 },
    #[error("Cannot redeem coins: the time lock has not yet expired (locked until {lock_time})")]
    LockNotExpired { lock_time: u32, serialized_tx: String },
    #[error("Error while broadcasting transaction: {source}")]
    BroadcastFailed {
        source: AggregateError,
        serialized_tx: String,
    },
    #[error("Unexpected error building a transaction: {0}")]
    Script(#[from] ScriptError),
    #[error("Unexpected error building a transaction: {0}")]
    Transaction(#[from] TransactionError),
    #[error("Explorer setup failed: {0}")]
    Explorer(#[from] ExplorerError),
}

impl From<PackageError> for RedeemError {
    fn from(err: PackageError) -> Self {
        match err {
            PackageError::UnknownChain(chain) => RedeemError::InvalidChain(chain),
            other => RedeemError::MalformedData(other.to_string()),
        }
    }
}

impl RedeemError {
    /// Signed transaction for manual broadcasting, when one was built
    pub fn serialized_tx(&self) -> Option<&str> {
        match self {
            RedeemError::LockNotExpired { serialized_tx, .. }
            | RedeemError::BroadcastFailed { serialized_tx, .. } => Some(serialized_tx),
            _ => None,
        }
    }
}

/// Human-readable UTC form of a Unix timestamp
pub fn format_lock_time(seconds: i64) -> String {
    match Utc.timestamp_opt(seconds, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => seconds.to_string(),
    }
}

// =============================================================================
// Creating
// =============================================================================

/// A freshly created time-locked address
#[derive(Debug, Clone)]
pub struct LockedAddress {
    /// P2SH address in the chain's canonical format
    pub address: String,
    pub lock_time: u32,
    pub variant: TimeLockVariant,
    pub package: RedeemPackage,
}

/// Check a lock time against the accepted window
pub fn validate_lock_time(lock_time_seconds: i64) -> Result<u32, RedeemError> {
    if !(MIN_LOCK_TIME..MAX_LOCK_TIME).contains(&lock_time_seconds) {
        return Err(RedeemError::InvalidLockTime(lock_time_seconds));
    }
    u32::try_from(lock_time_seconds).map_err(|_| RedeemError::InvalidLockTime(lock_time_seconds))
}

/// Lock funds to `key` until `lock_time_seconds`
pub fn lock_address_with_key(
    chain: &'static ChainProfile,
    lock_time_seconds: i64,
    variant: TimeLockVariant,
    key: &KeyPair,
) -> Result<LockedAddress, RedeemError> {
    let lock_time = validate_lock_time(lock_time_seconds)?;
    let script = build_redeem_script(variant, lock_time_seconds, &key.public_key)?;
    let address = Address::p2sh(&script, chain);

    Ok(LockedAddress {
        address: address.to_string(),
        lock_time,
        variant,
        package: RedeemPackage::new(chain, key, &script),
    })
}

/// Lock funds to a newly generated key until `lock_time_seconds`
pub fn create_locked_address(
    chain: &'static ChainProfile,
    lock_time_seconds: i64,
    variant: TimeLockVariant,
) -> Result<LockedAddress, RedeemError> {
    let key = KeyPair::generate();
    let locked = lock_address_with_key(chain, lock_time_seconds, variant, &key)?;
    log::info!(
        "Created {} time-locked address {} (unlocks {})",
        chain.short_name,
        locked.address,
        format_lock_time(lock_time_seconds)
    );
    Ok(locked)
}

// =============================================================================
// Redeeming
// =============================================================================

/// Progress of one redemption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemState {
    Idle,
    FetchingUtxos,
    FetchingFeeRates,
    BuildingTransaction,
    AwaitingConfirmation,
    Broadcasting,
    Done,
    Failed,
}

/// What the user is asked to approve before broadcasting
#[derive(Debug, Clone, PartialEq)]
pub struct TxDetails {
    pub to_address: String,
    /// Sum of all spent outputs, in satoshis
    pub total: u64,
    pub fee: u64,
    pub fee_rate: f64,
    pub num_inputs: usize,
    pub lock_time: u32,
    pub unit: &'static str,
    pub txid: String,
    pub serialized_tx: String,
}

impl TxDetails {
    /// Amount arriving at the destination
    pub fn amount(&self) -> u64 {
        self.total - self.fee
    }
}

impl fmt::Display for TxDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "To:      {}", self.to_address)?;
        writeln!(f, "Total:   {} {}", format_coins(self.total), self.unit)?;
        writeln!(
            f,
            "Fee:     {} {} ({:.3} sat/B, {} input(s))",
            format_coins(self.fee),
            self.unit,
            self.fee_rate,
            self.num_inputs
        )?;
        write!(f, "Receive: {} {}", format_coins(self.amount()), self.unit)
    }
}

/// Result of a redemption that didn't fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// Transaction id of the broadcast transaction
    Broadcast(String),
    /// The user declined to broadcast
    Cancelled,
}

/// Decisions a redemption delegates to the user
pub trait RedeemPrompt {
    /// Approve broadcasting the built transaction
    fn confirm(&mut self, details: &TxDetails) -> bool;

    /// Fee rate (sat/B) to use when no explorer could provide one
    fn manual_fee_rate(&mut self, _error: &AggregateError) -> Option<f64> {
        None
    }
}

/// Approves everything and never offers a manual fee
pub struct AutoConfirm;

impl RedeemPrompt for AutoConfirm {
    fn confirm(&mut self, _details: &TxDetails) -> bool {
        true
    }
}

/// Builds a [`BlockchainService`] for a chain
pub type Connector =
    Box<dyn Fn(&'static ChainProfile) -> Result<BlockchainService, ExplorerError> + Send + Sync>;

/// Entry point for everything that touches block explorers
pub struct TimeLockService {
    connector: Connector,
}

impl TimeLockService {
    /// Query the explorers listed in each chain profile
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            connector: Box::new(move |chain| BlockchainService::new(chain, &config)),
        }
    }

    /// Use a custom way of reaching explorers
    pub fn with_connector(connector: Connector) -> Self {
        Self { connector }
    }

    pub fn connect(&self, chain: &'static ChainProfile) -> Result<BlockchainService, RedeemError> {
        Ok((self.connector)(chain)?)
    }

    /// Start a redemption
    pub fn redeem_session(&self) -> RedeemSession<'_> {
        RedeemSession {
            service: self,
            state: RedeemState::Idle,
        }
    }

    /// Total unspent value held by any address, on the chain it belongs to
    pub async fn check_balance(&self, address: &str) -> Result<Balance, RedeemError> {
        let parsed = Address::detect(address).map_err(RedeemError::InvalidAddress)?;
        let chain = parsed.chain();
        let service = self.connect(chain)?;
        let utxos = service
            .get_utxos(&parsed.to_string())
            .await
            .map_err(RedeemError::Utxos)?;

        Ok(Balance {
            address: parsed.to_string(),
            chain,
            satoshis: checked_total(&utxos)?,
            utxo_count: utxos.len(),
        })
    }
}

/// Balance of an address
#[derive(Debug, Clone)]
pub struct Balance {
    pub address: String,
    pub chain: &'static ChainProfile,
    pub satoshis: u64,
    pub utxo_count: usize,
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} in {} output(s) at {}",
            format_coins(self.satoshis),
            self.chain.unit(),
            self.utxo_count,
            self.address
        )
    }
}

/// One redemption of a redeem package
pub struct RedeemSession<'a> {
    service: &'a TimeLockService,
    state: RedeemState,
}

impl<'a> RedeemSession<'a> {
    pub fn state(&self) -> RedeemState {
        self.state
    }

    fn transition(&mut self, next: RedeemState) {
        log::debug!("Redeem state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Send everything held by the package's address to `destination`
    ///
    /// `fee_override` is a fee rate in sat/B; without it the explorers are
    /// asked and, failing that, the prompt.
    pub async fn redeem_to_address(
        &mut self,
        package: &RedeemPackage,
        destination: &str,
        fee_override: Option<f64>,
        prompt: &mut dyn RedeemPrompt,
    ) -> Result<RedeemOutcome, RedeemError> {
        let result = self.run(package, destination, fee_override, prompt).await;
        match &result {
            Ok(_) => self.transition(RedeemState::Done),
            Err(e) => {
                log::warn!("Redeem failed: {}", e);
                self.transition(RedeemState::Failed);
            }
        }
        result
    }

    async fn run(
        &mut self,
        package: &RedeemPackage,
        destination: &str,
        fee_override: Option<f64>,
        prompt: &mut dyn RedeemPrompt,
    ) -> Result<RedeemOutcome, RedeemError> {
        let chain = chain_by_id(&package.blockchain)
            .ok_or_else(|| RedeemError::InvalidChain(package.blockchain.clone()))?;
        let destination = Address::parse(destination, chain).map_err(RedeemError::InvalidAddress)?;

        let script = package.script()?;
        let key = package.key()?;
        let info = parse_redeem_script(&script)
            .map_err(|e| RedeemError::MalformedData(format!("redeem script: {}", e)))?;
        if !info.is_spendable_by(&key) {
            return Err(RedeemError::MalformedData(
                "redeem key does not match the redeem script".to_string(),
            ));
        }
        if let Some(rate) = fee_override {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(RedeemError::InvalidFeeRate(rate));
            }
        }

        let service = self.service.connect(chain)?;
        let from = Address::p2sh(&script, chain);

        self.transition(RedeemState::FetchingUtxos);
        let utxos = service
            .get_utxos(&from.to_string())
            .await
            .map_err(RedeemError::Utxos)?;
        if utxos.is_empty() {
            return Err(RedeemError::NoBalance);
        }

        self.transition(RedeemState::FetchingFeeRates);
        let fee_rate = match fee_override {
            Some(rate) => rate,
            None => fetch_fee_rate(&service, prompt).await?,
        };

        self.transition(RedeemState::BuildingTransaction);
        let total = checked_total(&utxos)?;
        let size = estimate_tx_size(info.variant, utxos.len());
        let fee = FeeRates::flat(fee_rate).fee_for_size(size);
        if total <= fee {
            return Err(RedeemError::InsufficientFunds { total, fee });
        }

        let tx = build_redeem_tx(
            chain,
            &utxos,
            &destination,
            total - fee,
            info.lock_time,
            info.variant,
            &key,
            &script,
        )?;
        let serialized_tx = to_hex(&tx);
        log::debug!("Serialized transaction: {}", serialized_tx);

        let now = Utc::now().timestamp();
        if now < info.lock_time as i64 {
            return Err(RedeemError::LockNotExpired {
                lock_time: info.lock_time,
                serialized_tx,
            });
        }

        self.transition(RedeemState::AwaitingConfirmation);
        let details = TxDetails {
            to_address: destination.to_string(),
            total,
            fee,
            fee_rate,
            num_inputs: utxos.len(),
            lock_time: info.lock_time,
            unit: chain.unit(),
            txid: txid_hex(&tx),
            serialized_tx,
        };
        if !prompt.confirm(&details) {
            log::info!("Redeem cancelled before broadcast");
            return Ok(RedeemOutcome::Cancelled);
        }

        self.transition(RedeemState::Broadcasting);
        match service.broadcast_tx(&details.serialized_tx).await {
            Ok(txid) => Ok(RedeemOutcome::Broadcast(txid)),
            Err(source) => Err(RedeemError::BroadcastFailed {
                source,
                serialized_tx: details.serialized_tx,
            }),
        }
    }
}

/// Sum of the explorer-reported UTXO values
fn checked_total(utxos: &[Utxo]) -> Result<u64, RedeemError> {
    total_value(utxos).ok_or_else(|| {
        RedeemError::MalformedData("unspent output values overflow".to_string())
    })
}

async fn fetch_fee_rate(
    service: &BlockchainService,
    prompt: &mut dyn RedeemPrompt,
) -> Result<f64, RedeemError> {
    match service.get_fee_rates().await {
        Ok(rates) => Ok(rates.high),
        Err(e) => match prompt.manual_fee_rate(&e) {
            Some(rate) if rate.is_finite() && rate > 0.0 => {
                log::info!("Using manual fee rate {} sat/B", rate);
                Ok(rate)
            }
            _ => Err(RedeemError::FeeRates(e)),
        },
    }
}

/// Spend every UTXO to `destination` and sign each input
#[allow(clippy::too_many_arguments)]
fn build_redeem_tx(
    chain: &ChainProfile,
    utxos: &[Utxo],
    destination: &Address,
    amount: u64,
    lock_time: u32,
    variant: TimeLockVariant,
    key: &KeyPair,
    redeem_script: &Script,
) -> Result<Transaction, RedeemError> {
    // nLockTime one past the script's lock time; inputs must be non-final
    let mut builder = TransactionBuilder::new()
        .sequence(SEQUENCE_LOCKTIME_ENABLED)
        .lock_time(lock_time.saturating_add(1));
    for utxo in utxos {
        builder = builder.add_input(utxo)?;
    }
    let mut tx = builder
        .add_output(destination.script_pubkey(), amount)
        .build();

    let script_sigs = utxos
        .iter()
        .enumerate()
        .map(|(i, utxo)| {
            build_script_sig(
                variant,
                &tx,
                i,
                key,
                redeem_script,
                chain.sighash_flags,
                Some(utxo.satoshis),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    for (input, script_sig) in tx.input.iter_mut().zip(script_sigs) {
        input.script_sig = script_sig;
    }

    Ok(tx)
}
