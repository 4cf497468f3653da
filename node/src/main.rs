// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # omniwrap Devnet Node
//!
//! Entry point for the `omniwrap-node` binary. Parses CLI arguments,
//! initializes logging and metrics, and runs one of:
//!
//! - `serve`        — run the devnet and serve the API and metrics
//! - `simulate`     — run a scripted round trip and print a JSON report
//! - `init`         — write a default devnet config file
//! - `estimate-fee` — print the wrap fee for an amount
//! - `version`      — print build version information

mod actor;
mod api;
mod cli;
mod devnet;
mod logging;
mod metrics;
mod runtime;
mod simulate;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

use omniwrap_protocol::config::{DevnetConfig, FEE_DENOMINATOR_BPS, PROTOCOL_VERSION};
use omniwrap_protocol::{Address, VaultService};

use cli::{Commands, DevnetArgs, OmniwrapCli};
use devnet::Devnet;
use logging::{LogFormat, DEFAULT_FILTER};
use metrics::NodeMetrics;
use runtime::DevnetRuntime;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = OmniwrapCli::parse();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Simulate(args) => run_simulation(args).await,
        Commands::Init(args) => init_config(args),
        Commands::EstimateFee(args) => estimate_fee(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Loads the devnet config named on the command line, or the default one.
fn load_config(args: &DevnetArgs) -> Result<DevnetConfig> {
    match &args.config {
        Some(path) => DevnetConfig::from_json_file(path)
            .with_context(|| format!("failed to load devnet config {}", path.display())),
        None => Ok(DevnetConfig::default()),
    }
}

/// Starts the devnet and serves the API and metrics until a shutdown signal.
async fn serve(args: cli::ServeArgs) -> Result<()> {
    logging::init_logging(DEFAULT_FILTER, LogFormat::from_str_lossy(&args.devnet.log_format));

    let config = load_config(&args.devnet)?;
    tracing::info!(
        ledgers = config.ledgers.len(),
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        "starting omniwrap-node"
    );

    let mut devnet = Devnet::build(&config)?;
    for label in &args.seed_accounts {
        let account = Address::derive(label);
        devnet.seed_account(&account, args.seed_underlying, args.seed_native)?;
        tracing::info!(label = %label, account = %account, "seeded account");
    }
    for (ledger_id, vault) in &devnet.vaults {
        tracing::info!(ledger = ledger_id, vault = %vault.address(), "vault attached");
    }
    tracing::info!(owner = %devnet.owner, executor = %devnet.gate.executor(), "admin gate");

    // --- Metrics ---
    let node_metrics =
        Arc::new(NodeMetrics::new().context("failed to create metrics registry")?);

    // --- Ledger actors and relay router ---
    let runtime = DevnetRuntime::start(devnet, Arc::clone(&node_metrics));

    // --- Application state ---
    let app_state = api::AppState {
        version: format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
        ledgers: Arc::new(runtime.ledgers.clone()),
        relay: Arc::clone(&runtime.relay),
        asset_symbol: runtime.asset.symbol().to_string(),
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    runtime.shutdown().await;
    tracing::info!("omniwrap-node stopped");
    Ok(())
}

/// Runs the scripted scenario and prints its report to stdout.
async fn run_simulation(args: cli::SimulateArgs) -> Result<()> {
    logging::init_logging(DEFAULT_FILTER, LogFormat::from_str_lossy(&args.devnet.log_format));

    let config = load_config(&args.devnet)?;
    let node_metrics =
        Arc::new(NodeMetrics::new().context("failed to create metrics registry")?);
    let report = simulate::run(
        &config,
        simulate::Scenario {
            amount: args.amount,
            use_strategy: args.use_strategy,
        },
        Arc::clone(&node_metrics),
    )
    .await
    .context("scenario failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    tracing::info!(
        dispatched = node_metrics.messages_dispatched_total.get(),
        delivered = node_metrics.messages_delivered_total.get(),
        rejected = node_metrics.messages_rejected_total.get(),
        "simulation finished"
    );
    Ok(())
}

fn init_config(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("omniwrap_node=info", LogFormat::Pretty);

    let config = write_default_config(&args.output, args.force)?;
    tracing::info!(path = %args.output.display(), ledgers = config.ledgers.len(), "config written");
    println!("Devnet config written to {}", args.output.display());
    Ok(())
}

/// Writes the default devnet config to `path` as pretty JSON. Refuses to
/// replace an existing file unless `force` is set.
fn write_default_config(path: &Path, force: bool) -> Result<DevnetConfig> {
    if path.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    let config = DevnetConfig::default();
    let body = serde_json::to_string_pretty(&config)?;
    std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(config)
}

fn estimate_fee(args: cli::EstimateFeeArgs) -> Result<()> {
    if args.fee_rate_bps > FEE_DENOMINATOR_BPS {
        bail!(
            "fee rate {} bps exceeds {} bps",
            args.fee_rate_bps,
            FEE_DENOMINATOR_BPS
        );
    }
    let fee =
        omniwrap_contracts::estimate_fee(args.fee_rate_bps, FEE_DENOMINATOR_BPS, args.amount);
    println!("amount   {}", args.amount);
    println!("fee      {}", fee);
    println!("received {}", args.amount - fee);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("omniwrap-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol      {}", PROTOCOL_VERSION);
    println!("rustc         {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_init() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devnet.json");

        let written = write_default_config(&path, false).unwrap();
        let loaded = load_config(&DevnetArgs {
            config: Some(path.clone()),
            log_format: "pretty".into(),
        })
        .unwrap();
        assert_eq!(written, loaded);

        assert!(write_default_config(&path, false).is_err());
        assert!(write_default_config(&path, true).is_ok());
    }

    #[test]
    fn estimate_fee_rejects_rate_above_denominator() {
        let args = cli::EstimateFeeArgs {
            amount: 1_000,
            fee_rate_bps: FEE_DENOMINATOR_BPS + 1,
        };
        assert!(estimate_fee(args).is_err());
    }
}
