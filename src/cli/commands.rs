//! CLI commands for time-locked addresses
//!
//! Implements all command handlers for the CLI interface.

use chrono::DateTime;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use crate::core::chain::{chain_by_id, ChainProfile, ALL_CHAINS};
use crate::core::fee::format_coins;
use crate::core::package::RedeemPackage;
use crate::core::script::TimeLockVariant;
use crate::network::AggregateError;
use crate::wallet::{
    create_locked_address, format_lock_time, AutoConfirm, RedeemError, RedeemOutcome,
    RedeemPrompt, TimeLockService, TxDetails,
};

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Look up a chain by its short name
pub fn resolve_chain(id: &str) -> CliResult<&'static ChainProfile> {
    chain_by_id(id).ok_or_else(|| {
        let known: Vec<&str> = ALL_CHAINS.iter().map(|c| c.short_name).collect();
        format!("Unknown chain \"{}\" (expected one of {})", id, known.join(", ")).into()
    })
}

/// Accept Unix seconds or an RFC 3339 timestamp
pub fn parse_lock_time(input: &str) -> CliResult<i64> {
    let input = input.trim();
    if let Ok(seconds) = input.parse::<i64>() {
        return Ok(seconds);
    }
    let time = DateTime::parse_from_rfc3339(input)
        .map_err(|e| format!("Invalid lock time \"{}\": {}", input, e))?;
    Ok(time.timestamp())
}

/// Read a package from a file, or from inline JSON
pub fn load_package(source: &str) -> CliResult<RedeemPackage> {
    let json = if source.trim_start().starts_with('{') {
        source.to_string()
    } else {
        fs::read_to_string(source)?
    };
    Ok(RedeemPackage::from_json(&json)?)
}

/// Write a package as pretty JSON
pub fn save_package(package: &RedeemPackage, path: &Path) -> CliResult<()> {
    fs::write(path, package.to_json_pretty()?)?;
    Ok(())
}

/// Create a time-locked address
pub fn cmd_create(
    chain_id: &str,
    lock_time: &str,
    variant: TimeLockVariant,
    output: Option<&Path>,
) -> CliResult<()> {
    let chain = resolve_chain(chain_id)?;
    let lock_time = parse_lock_time(lock_time)?;
    let locked = create_locked_address(chain, lock_time, variant)?;

    println!("🔒 Time-locked address created!");
    println!("   ⛓️  Chain: {}", chain);
    println!("   📍 Address: {}", locked.address);
    println!("   ⏰ Unlocks: {}", format_lock_time(lock_time));
    println!("   🔧 Variant: {}", locked.variant);

    match output {
        Some(path) => {
            save_package(&locked.package, path)?;
            println!("   💾 Redeem data saved to {:?}", path);
        }
        None => {
            println!("\n{}", locked.package.to_json_pretty()?);
        }
    }

    println!("\n   ⚠️  IMPORTANT: The redeem data holds the private key.");
    println!("   Without it the locked coins cannot be recovered!");

    Ok(())
}

/// Redeem all coins held by a package's address
pub async fn cmd_redeem(
    service: &TimeLockService,
    package: &str,
    to: &str,
    fee_rate: Option<f64>,
    yes: bool,
) -> CliResult<()> {
    let package = load_package(package)?;

    let mut stdin_prompt;
    let mut auto = AutoConfirm;
    let prompt: &mut dyn RedeemPrompt = if yes {
        &mut auto
    } else {
        stdin_prompt = LinePrompt::new(io::stdin().lock());
        &mut stdin_prompt
    };

    println!("🔓 Redeeming {} coins to {}...", package.blockchain, to);

    let mut session = service.redeem_session();
    match session.redeem_to_address(&package, to, fee_rate, prompt).await {
        Ok(RedeemOutcome::Broadcast(txid)) => {
            println!("✅ Transaction broadcast!");
            println!("   🧾 Txid: {}", txid);
            Ok(())
        }
        Ok(RedeemOutcome::Cancelled) => {
            println!("🚫 Cancelled, nothing was broadcast");
            Ok(())
        }
        Err(err) => {
            if let Some(tx) = err.serialized_tx() {
                print_manual_broadcast(&err, tx);
            }
            Err(err.into())
        }
    }
}

fn print_manual_broadcast(err: &RedeemError, tx: &str) {
    if let RedeemError::LockNotExpired { lock_time, .. } = err {
        println!("⏳ Locked until {}", format_lock_time(*lock_time as i64));
        println!("   The signed transaction below can be broadcast after that:");
    } else {
        println!("📋 The signed transaction can be broadcast manually:");
    }
    println!("{}", tx);
}

/// Show the balance of any address
pub async fn cmd_balance(service: &TimeLockService, address: &str) -> CliResult<()> {
    let balance = service.check_balance(address).await?;

    println!("💰 Balance for {}", balance.address);
    println!("   ⛓️  Chain: {}", balance.chain);
    println!("   Total: {} {}", format_coins(balance.satoshis), balance.chain.unit());
    println!("   UTXOs: {}", balance.utxo_count);

    Ok(())
}

/// Show current fee rates
pub async fn cmd_fees(service: &TimeLockService, chain_id: &str) -> CliResult<()> {
    let chain = resolve_chain(chain_id)?;
    let rates = service
        .connect(chain)?
        .get_fee_rates()
        .await
        .map_err(RedeemError::FeeRates)?;

    println!("⛽ Fee rates for {}", chain);
    println!("   High:   {:.3} sat/B", rates.high);
    println!("   Medium: {:.3} sat/B", rates.medium);
    println!("   Low:    {:.3} sat/B", rates.low);

    Ok(())
}

/// Show the USD exchange rate
pub async fn cmd_price(service: &TimeLockService, chain_id: &str) -> CliResult<()> {
    let chain = resolve_chain(chain_id)?;
    let rate = service
        .connect(chain)?
        .get_usd_rate()
        .await
        .map_err(|e| format!("Error while getting the exchange rate: {}", e))?;

    println!("💵 1 {} = {:.2} USD", chain.unit(), rate);

    Ok(())
}

/// List supported chains
pub fn cmd_chains() -> CliResult<()> {
    println!("📋 Chains:");
    for chain in ALL_CHAINS.iter() {
        println!("   {} - {}", chain.short_name, chain.long_name);
        for explorer in chain.explorers {
            println!("   └─ {} ({:?})", explorer.url, explorer.family);
        }
    }

    Ok(())
}

/// Prompt reading answers line by line
pub struct LinePrompt<R> {
    reader: R,
}

impl<R: BufRead> LinePrompt<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    fn ask(&mut self, question: &str) -> Option<String> {
        print!("{}", question);
        io::stdout().flush().ok()?;
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl<R: BufRead> RedeemPrompt for LinePrompt<R> {
    fn confirm(&mut self, details: &TxDetails) -> bool {
        println!("\n📝 Transaction ready");
        for line in details.to_string().lines() {
            println!("   {}", line);
        }
        matches!(
            self.ask("\nBroadcast this transaction? [y/N] ").as_deref(),
            Some("y") | Some("Y") | Some("yes")
        )
    }

    fn manual_fee_rate(&mut self, error: &AggregateError) -> Option<f64> {
        println!("⚠️  Could not get fee rates: {}", error);
        let answer = self.ask("Enter a fee rate in sat/B (empty to abort): ")?;
        answer.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chain::BTC;
    use crate::crypto::KeyPair;
    use crate::wallet::lock_address_with_key;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn details() -> TxDetails {
        TxDetails {
            to_address: "1BpEi6DfDAUFd7GtittLSdBeYJvcoaVggu".to_string(),
            total: 100_000,
            fee: 450,
            fee_rate: 2.0,
            num_inputs: 1,
            lock_time: 1_600_000_000,
            unit: "BTC",
            txid: "00".repeat(32),
            serialized_tx: "0200".to_string(),
        }
    }

    #[test]
    fn test_package_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("redeem.json");
        let key = KeyPair::generate();
        let locked =
            lock_address_with_key(&BTC, 1_740_000_000, TimeLockVariant::PayToPubKeyHash, &key)
                .unwrap();

        save_package(&locked.package, &path).unwrap();
        let loaded = load_package(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded, locked.package);

        let inline = load_package(&locked.package.to_json().unwrap()).unwrap();
        assert_eq!(inline, locked.package);
    }

    #[test]
    fn test_load_package_errors() {
        assert!(load_package("/nonexistent/redeem.json").is_err());
        assert!(load_package(r#"{"version": 1, "blockchain": "BTC"}"#).is_err());
    }

    #[test]
    fn test_parse_lock_time() {
        assert_eq!(parse_lock_time("1740000000").unwrap(), 1_740_000_000);
        assert_eq!(
            parse_lock_time("2025-02-19T21:20:00Z").unwrap(),
            1_740_000_000
        );
        assert_eq!(
            parse_lock_time("2025-02-19T22:20:00+01:00").unwrap(),
            1_740_000_000
        );
        assert!(parse_lock_time("next tuesday").is_err());
    }

    #[test]
    fn test_resolve_chain() {
        assert_eq!(resolve_chain("tBCH").unwrap().short_name, "tBCH");
        let err = resolve_chain("LTC").unwrap_err().to_string();
        assert!(err.contains("BTC, tBTC, BCH, tBCH"));
    }

    #[test]
    fn test_line_prompt_confirm() {
        let mut yes = LinePrompt::new(Cursor::new("y\n"));
        assert!(yes.confirm(&details()));

        let mut no = LinePrompt::new(Cursor::new("\n"));
        assert!(!no.confirm(&details()));

        let mut eof = LinePrompt::new(Cursor::new(""));
        assert!(!eof.confirm(&details()));
    }

    #[test]
    fn test_line_prompt_manual_fee() {
        let error = AggregateError::single(crate::network::ExplorerError::Fetch(
            "offline".to_string(),
        ));

        let mut prompt = LinePrompt::new(Cursor::new("3.5\n"));
        assert_eq!(prompt.manual_fee_rate(&error), Some(3.5));

        let mut prompt = LinePrompt::new(Cursor::new("\n"));
        assert_eq!(prompt.manual_fee_rate(&error), None);
    }
}
