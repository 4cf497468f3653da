//! # Scripted Devnet Scenario
//!
//! Drives one account through every bridge flow on a fresh devnet and
//! reports what each step did: wrap on the origin, send to a peer, a vault
//! deposit and withdrawal round trip, a send back, unwrap, and a fee
//! harvest.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use omniwrap_contracts::{AccountSnapshot, LedgerSnapshot, VaultRequest};
use omniwrap_protocol::config::DevnetConfig;
use omniwrap_protocol::{
    AdapterParams, Address, Amount, DispatchOptions, LedgerId, UnderlyingAsset,
};

use crate::devnet::{Devnet, DEVNET_ASSET_ID};
use crate::metrics::SharedMetrics;
use crate::runtime::DevnetRuntime;

/// Native currency given to the scenario account on every ledger.
const SCENARIO_NATIVE: Amount = 1_000_000_000;

/// Native currency attached to each dispatch. Unused value is refunded.
const DISPATCH_VALUE: Amount = 10_000_000;

/// Destination gas for vault flows.
const VAULT_GAS_LIMIT: u64 = 200_000;

/// Native currency airdropped to the peer ledger to pay the return trip.
const RETURN_AIRDROP: Amount = 2_000_000;

/// Scenario parameters.
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    /// Underlying wrapped at the start.
    pub amount: Amount,
    /// Use the strategy path for the vault round trip.
    pub use_strategy: bool,
}

/// One completed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: &'static str,
    pub ledger_id: LedgerId,
    pub detail: serde_json::Value,
}

/// Everything `simulate` prints.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub account: Address,
    pub steps: Vec<StepReport>,
    pub ledgers: Vec<LedgerSnapshot>,
    pub balances: Vec<AccountSnapshot>,
    pub underlying_balance: Amount,
    pub operator_underlying: Amount,
}

fn step(step: &'static str, ledger_id: LedgerId, detail: serde_json::Value) -> StepReport {
    info!(step, ledger = ledger_id, "scenario step done");
    StepReport {
        step,
        ledger_id,
        detail,
    }
}

/// Runs the scenario on a devnet built from `config`.
pub async fn run(
    config: &DevnetConfig,
    scenario: Scenario,
    metrics: SharedMetrics,
) -> Result<SimulationReport> {
    let mut devnet = Devnet::build(config)?;
    let origin_id = config.origin().context("no origin ledger")?.ledger_id;
    let peer_id = config
        .ledgers
        .iter()
        .find(|l| !l.origin)
        .map(|l| l.ledger_id)
        .context("scenario needs at least one peer ledger")?;
    let peer_address = devnet
        .ledgers
        .iter()
        .find(|l| l.ledger_id() == peer_id)
        .map(|l| l.address())
        .context("peer ledger missing from devnet")?;

    let account = Address::derive("omniwrap/devnet/scenario");
    devnet.seed_account(&account, scenario.amount, SCENARIO_NATIVE)?;
    let mut runtime = DevnetRuntime::start(devnet, metrics);
    let origin = runtime.ledger(origin_id)?.clone();
    let peer = runtime.ledger(peer_id)?.clone();
    let options = DispatchOptions::refund_to(account);
    let mut steps = Vec::new();

    let minted = origin.wrap(account, account, scenario.amount).await?;
    steps.push(step("wrap", origin_id, serde_json::json!({ "minted": minted })));

    let outbound = minted / 2;
    let receipt = origin
        .send(account, account, peer_id, outbound, options.clone(), DISPATCH_VALUE)
        .await?;
    runtime.settle().await?;
    steps.push(step("send", origin_id, serde_json::to_value(receipt)?));

    let vault_amount = (minted - outbound) / 2;
    let request = VaultRequest {
        amount: vault_amount,
        asset_id: DEVNET_ASSET_ID,
        dest_ledger_id: peer_id,
        use_strategy: scenario.use_strategy,
    };
    let receipt = origin
        .send_to_vault(account, request, VAULT_GAS_LIMIT, account, DISPATCH_VALUE)
        .await?;
    runtime.settle().await?;
    steps.push(step("send_to_vault", origin_id, serde_json::to_value(receipt)?));

    let params = AdapterParams::Airdrop {
        gas_limit: VAULT_GAS_LIMIT,
        amount: RETURN_AIRDROP,
        recipient: peer_address,
    }
    .encode();
    let receipt = origin
        .retrieve_from_vault(account, request, params, DISPATCH_VALUE)
        .await?;
    runtime.settle().await?;
    steps.push(step("retrieve_from_vault", origin_id, serde_json::to_value(receipt)?));

    let on_peer = peer.account(account).await?.wrapped_balance;
    if on_peer > 0 {
        let receipt = peer
            .send(account, account, origin_id, on_peer, options, DISPATCH_VALUE)
            .await?;
        runtime.settle().await?;
        steps.push(step("send_back", peer_id, serde_json::to_value(receipt)?));
    }

    let held = origin.account(account).await?.wrapped_balance;
    origin.unwrap(account, account, held).await?;
    steps.push(step("unwrap", origin_id, serde_json::json!({ "released": held })));

    let harvested = origin.harvest_fees().await?;
    steps.push(step("harvest_fees", origin_id, serde_json::json!({ "harvested": harvested })));

    let mut ledgers = Vec::new();
    let mut balances = Vec::new();
    for handle in runtime.ledgers.values() {
        ledgers.push(handle.snapshot().await?);
        balances.push(handle.account(account).await?);
    }
    let report = SimulationReport {
        account,
        steps,
        ledgers,
        balances,
        underlying_balance: runtime.asset.balance_of(&account),
        operator_underlying: runtime.asset.balance_of(&runtime.operator),
    };

    drop((origin, peer));
    runtime.shutdown().await;
    Ok(report)
}
