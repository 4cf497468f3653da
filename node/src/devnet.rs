//! # Devnet Assembly
//!
//! Turns a [`DevnetConfig`] into live ledger instances wired to one
//! in-process relay. The origin ledger takes custody of an in-memory
//! underlying asset; every other ledger gets its own in-memory vault with
//! the devnet asset registered. All ledgers trust each other and share one
//! admin gate.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use omniwrap_contracts::{AdminCall, AdminGate, BridgeLedger, LedgerParams};
use omniwrap_protocol::config::{DevnetConfig, LedgerSpec};
use omniwrap_protocol::{
    Address, Amount, AssetId, InMemoryAsset, InMemoryRelay, InMemoryVault, LedgerId,
};

/// Asset id registered in every devnet vault.
pub const DEVNET_ASSET_ID: AssetId = 1;

/// Symbol of the devnet underlying asset.
pub const DEVNET_SYMBOL: &str = "OWT";

/// Fully wired devnet, before the ledgers are handed to actors.
pub struct Devnet {
    pub relay: Arc<InMemoryRelay>,
    pub asset: Arc<InMemoryAsset>,
    pub vaults: Vec<(LedgerId, Arc<InMemoryVault>)>,
    pub gate: AdminGate,
    pub owner: Address,
    pub operator: Address,
    pub ledgers: Vec<BridgeLedger>,
}

/// Contract address of a ledger instance, derived from its label.
pub fn ledger_address(spec: &LedgerSpec) -> Address {
    Address::derive(&format!("omniwrap/ledger/{}", spec.label))
}

impl Devnet {
    /// Validates `config` and builds every ledger it lists.
    pub fn build(config: &DevnetConfig) -> Result<Self> {
        config.validate().context("devnet config rejected")?;
        let origin = config
            .origin()
            .context("devnet config has no origin ledger")?;

        let relay = Arc::new(InMemoryRelay::new(config.relay));
        let asset = Arc::new(InMemoryAsset::new(DEVNET_SYMBOL, config.decimals));
        let owner = Address::derive("omniwrap/devnet/owner");
        let operator = Address::derive("omniwrap/devnet/operator");
        let gate = AdminGate::new(owner);

        let mut ledgers = Vec::with_capacity(config.ledgers.len());
        let mut vaults = Vec::new();
        for spec in &config.ledgers {
            relay.register_ledger(spec.ledger_id);
            let params = LedgerParams::new(spec.ledger_id, ledger_address(spec), operator)
                .with_fee_rate(spec.fee_rate_bps)
                .with_decimals(config.decimals);

            let ledger = if spec.origin {
                BridgeLedger::origin(params, asset.clone(), relay.clone(), gate.authority())
                    .with_context(|| format!("failed to create origin ledger {}", spec.ledger_id))?
            } else {
                let vault = Arc::new(InMemoryVault::new(Address::derive(&format!(
                    "omniwrap/vault/{}",
                    spec.label
                ))));
                vault.add_asset(DEVNET_ASSET_ID);
                vaults.push((spec.ledger_id, vault.clone()));
                BridgeLedger::peer(params, origin.ledger_id, relay.clone(), gate.authority())
                    .with_context(|| format!("failed to create peer ledger {}", spec.ledger_id))?
                    .with_vault(vault)
            };

            info!(
                ledger = spec.ledger_id,
                label = %spec.label,
                address = %ledger.address(),
                origin = spec.origin,
                "ledger created"
            );
            ledgers.push(ledger);
        }

        let mut devnet = Self {
            relay,
            asset,
            vaults,
            gate,
            owner,
            operator,
            ledgers,
        };
        devnet.trust_all()?;
        Ok(devnet)
    }

    /// Registers every ledger as a trusted peer of every other.
    fn trust_all(&mut self) -> Result<()> {
        let endpoints: Vec<(LedgerId, Address)> = self
            .ledgers
            .iter()
            .map(|l| (l.ledger_id(), l.address()))
            .collect();

        for ledger in &mut self.ledgers {
            for &(remote_ledger_id, remote_address) in &endpoints {
                if remote_ledger_id == ledger.ledger_id() {
                    continue;
                }
                self.gate
                    .execute(
                        &self.owner,
                        ledger,
                        AdminCall::SetPeer {
                            remote_ledger_id,
                            remote_address,
                        },
                        false,
                    )
                    .with_context(|| {
                        format!(
                            "ledger {} failed to trust ledger {}",
                            ledger.ledger_id(),
                            remote_ledger_id
                        )
                    })?;
            }
        }
        Ok(())
    }

    /// Mints `underlying` to `account` and gives it `native` gas currency
    /// on every ledger. Also approves the origin ledger for the minted
    /// underlying.
    pub fn seed_account(
        &mut self,
        account: &Address,
        underlying: Amount,
        native: Amount,
    ) -> Result<()> {
        self.asset
            .mint(account, underlying)
            .with_context(|| format!("failed to mint underlying to {account}"))?;
        for ledger in &mut self.ledgers {
            if ledger.is_origin() {
                self.asset.approve(account, &ledger.address(), underlying);
            }
            ledger.fund_native(account, native);
        }
        info!(account = %account, underlying, native, "devnet account seeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omniwrap_protocol::UnderlyingAsset;

    #[test]
    fn default_config_builds_mutually_trusting_ledgers() {
        let devnet = Devnet::build(&DevnetConfig::default()).unwrap();

        assert_eq!(devnet.ledgers.len(), 2);
        assert_eq!(devnet.vaults.len(), 1);
        for ledger in &devnet.ledgers {
            assert_eq!(ledger.peers().len(), 1);
        }
        assert!(devnet.ledgers[0].is_origin());
        assert!(!devnet.ledgers[1].is_origin());
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut config = DevnetConfig::default();
        config.ledgers[1].origin = true;
        assert!(Devnet::build(&config).is_err());
    }

    #[test]
    fn seeding_funds_every_ledger() {
        let mut devnet = Devnet::build(&DevnetConfig::default()).unwrap();
        let user = Address::derive("user");
        devnet.seed_account(&user, 1_000, 77).unwrap();

        for ledger in &devnet.ledgers {
            assert_eq!(ledger.native_balance_of(&user), 77);
        }
        let origin = devnet.ledgers[0].address();
        assert_eq!(devnet.asset.allowance(&user, &origin), 1_000);
    }
}
