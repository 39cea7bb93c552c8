//! CLTV Time-Lock CLI Application
//!
//! A command-line interface for creating and redeeming time-locked addresses.

use clap::{Parser, Subcommand};
use cltv_timelock::cli;
use cltv_timelock::core::TimeLockVariant;
use cltv_timelock::network::ServiceConfig;
use cltv_timelock::wallet::TimeLockService;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "timelock")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Lock Bitcoin and Bitcoin Cash until a point in time", long_about = None)]
struct Cli {
    /// Per-request explorer timeout in milliseconds
    #[arg(long, global = true, default_value = "10000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new time-locked address
    Create {
        /// Chain (BTC, tBTC, BCH, tBCH)
        #[arg(short, long)]
        chain: String,

        /// Unlock time, Unix seconds or RFC 3339
        #[arg(short, long)]
        lock_time: String,

        /// Script variant (pk or pkh)
        #[arg(short, long, default_value = "pkh")]
        variant: TimeLockVariant,

        /// File to save the redeem data to
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Send the coins of a time-locked address somewhere else
    Redeem {
        /// Redeem data file, or the JSON itself
        #[arg(short, long)]
        package: String,

        /// Destination address
        #[arg(short, long)]
        to: String,

        /// Fee rate in sat/B instead of the explorers' estimate
        #[arg(short, long)]
        fee_rate: Option<f64>,

        /// Broadcast without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the balance of an address
    Balance {
        /// Any BTC or BCH address
        #[arg(short, long)]
        address: String,
    },

    /// Show current fee rates
    Fees {
        #[arg(short, long)]
        chain: String,
    },

    /// Show the USD exchange rate
    Price {
        #[arg(short, long)]
        chain: String,
    },

    /// List supported chains and their explorers
    Chains,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Offline commands don't need a runtime
    match &cli.command {
        Commands::Create {
            chain,
            lock_time,
            variant,
            output,
        } => return cli::cmd_create(chain, lock_time, *variant, output.as_deref()),
        Commands::Chains => return cli::cmd_chains(),
        _ => {}
    }

    let config = ServiceConfig {
        timeout: Duration::from_millis(cli.timeout_ms),
        ..Default::default()
    };
    let service = TimeLockService::new(config);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cli.command {
            Commands::Create { .. } | Commands::Chains => unreachable!(),

            Commands::Redeem {
                package,
                to,
                fee_rate,
                yes,
            } => cli::cmd_redeem(&service, &package, &to, fee_rate, yes).await,

            Commands::Balance { address } => cli::cmd_balance(&service, &address).await,

            Commands::Fees { chain } => cli::cmd_fees(&service, &chain).await,

            Commands::Price { chain } => cli::cmd_price(&service, &chain).await,
        }
    })
}
