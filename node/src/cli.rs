//! # CLI Interface
//!
//! Command-line arguments for `omniwrap-node`, built with `clap` derive.
//! Subcommands: `serve`, `simulate`, `init`, `estimate-fee` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use omniwrap_protocol::config::{DEFAULT_API_PORT, DEFAULT_FEE_RATE_BPS, DEFAULT_METRICS_PORT};

/// omniwrap devnet node.
///
/// Runs a set of wrapped-asset bridge ledgers in one process, connected by
/// an in-process relay, and exposes their state over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "omniwrap-node",
    about = "omniwrap cross-ledger bridge devnet node",
    version,
    propagate_version = true
)]
pub struct OmniwrapCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the devnet: ledger actors, relay router, API and metrics.
    Serve(ServeArgs),
    /// Run a scripted round trip on a fresh devnet and print a JSON report.
    Simulate(SimulateArgs),
    /// Write a default devnet config file.
    Init(InitArgs),
    /// Print the wrap fee for an amount at a given rate.
    EstimateFee(EstimateFeeArgs),
    /// Print version information and exit.
    Version,
}

/// Options shared by every subcommand that builds a devnet.
#[derive(clap::Args, Debug)]
pub struct DevnetArgs {
    /// Path to a devnet config file (JSON). Uses the built-in two-ledger
    /// devnet when omitted.
    #[arg(long, short = 'c', env = "OMNIWRAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "OMNIWRAP_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `serve` subcommand.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub devnet: DevnetArgs,

    /// Port for the REST API.
    #[arg(long, env = "OMNIWRAP_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "OMNIWRAP_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Label of an account to seed with underlying and native currency.
    /// May be repeated. The address is derived from the label.
    #[arg(long = "seed-account")]
    pub seed_accounts: Vec<String>,

    /// Underlying minted to each seeded account.
    #[arg(long, default_value_t = 1_000_000_000)]
    pub seed_underlying: u64,

    /// Native currency given to each seeded account on every ledger.
    #[arg(long, default_value_t = 1_000_000_000)]
    pub seed_native: u64,
}

/// Arguments for the `simulate` subcommand.
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub devnet: DevnetArgs,

    /// Underlying amount wrapped at the start of the scenario.
    #[arg(long, default_value_t = 1_000_000)]
    pub amount: u64,

    /// Route the vault round trip through the strategy position.
    #[arg(long)]
    pub use_strategy: bool,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Where to write the config.
    #[arg(long, short = 'o', default_value = "omniwrap-devnet.json")]
    pub output: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `estimate-fee` subcommand.
#[derive(Parser, Debug)]
pub struct EstimateFeeArgs {
    /// Amount to be wrapped.
    pub amount: u64,

    /// Fee rate in basis points.
    #[arg(long, default_value_t = DEFAULT_FEE_RATE_BPS)]
    pub fee_rate_bps: u64,
}
