//! # Devnet Runtime
//!
//! Owns the running pieces of a devnet: one actor per ledger, the relay
//! router, and the shutdown channel that stops them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use omniwrap_protocol::config::STORED_RETRY_INTERVAL_MS;
use omniwrap_protocol::{Address, InMemoryAsset, InMemoryRelay, LedgerId};

use crate::actor::{spawn_ledger, spawn_router, LedgerHandle, RouterHandle};
use crate::devnet::Devnet;
use crate::metrics::SharedMetrics;

pub struct DevnetRuntime {
    pub ledgers: BTreeMap<LedgerId, LedgerHandle>,
    pub relay: Arc<InMemoryRelay>,
    pub asset: Arc<InMemoryAsset>,
    pub operator: Address,
    router: RouterHandle,
    shutdown: watch::Sender<bool>,
    actors: Vec<JoinHandle<()>>,
}

impl DevnetRuntime {
    /// Moves every ledger of `devnet` into its own actor and starts the
    /// router.
    pub fn start(devnet: Devnet, metrics: SharedMetrics) -> Self {
        let Devnet {
            relay,
            asset,
            gate,
            operator,
            ledgers: instances,
            ..
        } = devnet;

        let mut ledgers = BTreeMap::new();
        let mut actors = Vec::with_capacity(instances.len());
        for ledger in instances {
            let (handle, task) = spawn_ledger(ledger, gate, metrics.clone());
            ledgers.insert(handle.ledger_id(), handle);
            actors.push(task);
        }

        let routes: HashMap<LedgerId, LedgerHandle> = ledgers
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let router = spawn_router(
            relay.clone(),
            routes,
            metrics,
            Duration::from_millis(STORED_RETRY_INTERVAL_MS),
            shutdown_rx,
        );

        info!(ledgers = ledgers.len(), "devnet runtime started");
        Self {
            ledgers,
            relay,
            asset,
            operator,
            router,
            shutdown,
            actors,
        }
    }

    pub fn ledger(&self, id: LedgerId) -> Result<&LedgerHandle> {
        self.ledgers
            .get(&id)
            .with_context(|| format!("no ledger {id} in this devnet"))
    }

    /// Waits until the relay queue is empty and every queued packet has
    /// been delivered or stored, including packets dispatched by those
    /// deliveries.
    pub async fn settle(&mut self) -> Result<()> {
        loop {
            let enqueued = self.relay.enqueued();
            if !self.router.wait_routed(enqueued).await {
                bail!("relay router stopped before the devnet settled");
            }
            if self.relay.enqueued() == enqueued {
                return Ok(());
            }
        }
    }

    /// Stops the router, then lets each actor drain its inbox and exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.router.join().await;
        drop(self.ledgers);
        for task in self.actors {
            let _ = task.await;
        }
        info!("devnet runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NodeMetrics;
    use omniwrap_protocol::config::DevnetConfig;
    use omniwrap_protocol::DispatchOptions;

    #[tokio::test]
    async fn settles_and_shuts_down() {
        let mut devnet = Devnet::build(&DevnetConfig::default()).unwrap();
        let user = Address::derive("runtime-user");
        devnet.seed_account(&user, 5_000, 10_000_000).unwrap();
        let metrics = Arc::new(NodeMetrics::new().unwrap());
        let mut runtime = DevnetRuntime::start(devnet, metrics);

        let origin = runtime.ledger(1).unwrap().clone();
        origin.wrap(user, user, 5_000).await.unwrap();
        for _ in 0..3 {
            origin
                .send(user, user, 10, 100, DispatchOptions::refund_to(user), 1_000_000)
                .await
                .unwrap();
        }
        runtime.settle().await.unwrap();

        let peer = runtime.ledger(10).unwrap();
        assert_eq!(peer.account(user).await.unwrap().wrapped_balance, 300);
        assert_eq!(runtime.relay.pending(), 0);
        assert!(runtime.ledger(99).is_err());

        drop(origin);
        runtime.shutdown().await;
    }
}
