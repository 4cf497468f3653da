//! # Ledger Actors and Relay Router
//!
//! Each ledger instance runs as a tokio task that owns its [`BridgeLedger`]
//! and serves [`LedgerCommand`]s from an `mpsc` inbox, one at a time.
//! Callers talk to it through a cloneable [`LedgerHandle`] and get replies
//! on `oneshot` channels.
//!
//! The relay router is a separate task. It pops packets off the
//! [`InMemoryRelay`] queue, delivers each to the destination actor and
//! waits for the outcome. A dispatch still returns as soon as its packet is
//! queued; the credit lands later. A packet the ledger refuses for a
//! reason that may clear later is stored back on the relay, which blocks
//! its path, and the router redelivers stored packets on a fixed interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use omniwrap_contracts::{
    AccountSnapshot, AdminCall, AdminGate, AdminOutcome, BridgeError, BridgeEvent, BridgeLedger,
    LedgerSnapshot, ReceiveOutcome, VaultRequest,
};
use omniwrap_protocol::{
    Address, Amount, DispatchOptions, DispatchReceipt, InMemoryRelay, LedgerId, Packet,
};

use crate::metrics::SharedMetrics;

/// Inbox depth for each ledger actor.
pub const INBOX_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure talking to a ledger actor.
#[derive(Debug, Error)]
pub enum ActorError {
    /// The actor task is gone.
    #[error("ledger {0} actor is not running")]
    Closed(LedgerId),

    /// The ledger refused the operation.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

type Reply<T> = oneshot::Sender<Result<T, BridgeError>>;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Work item for a ledger actor.
#[derive(Debug)]
pub enum LedgerCommand {
    Wrap {
        caller: Address,
        recipient: Address,
        amount: Amount,
        reply: Reply<Amount>,
    },
    Unwrap {
        caller: Address,
        recipient: Address,
        amount: Amount,
        reply: Reply<()>,
    },
    HarvestFees {
        reply: Reply<Amount>,
    },
    Send {
        caller: Address,
        recipient: Address,
        dest_ledger_id: LedgerId,
        amount: Amount,
        options: DispatchOptions,
        value: Amount,
        reply: Reply<DispatchReceipt>,
    },
    SendToVault {
        caller: Address,
        request: VaultRequest,
        gas_limit: u64,
        refund_address: Address,
        value: Amount,
        reply: Reply<DispatchReceipt>,
    },
    RetrieveFromVault {
        caller: Address,
        request: VaultRequest,
        adapter_params: Vec<u8>,
        value: Amount,
        reply: Reply<DispatchReceipt>,
    },
    /// Inbound packet from the router.
    Deliver {
        packet: Packet,
        reply: Reply<ReceiveOutcome>,
    },
    Admin {
        caller: Address,
        call: AdminCall,
        allow_failure: bool,
        reply: Reply<AdminOutcome>,
    },
    Snapshot {
        reply: oneshot::Sender<LedgerSnapshot>,
    },
    Account {
        account: Address,
        reply: oneshot::Sender<AccountSnapshot>,
    },
    Events {
        reply: oneshot::Sender<Vec<BridgeEvent>>,
    },
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct LedgerActor {
    ledger: BridgeLedger,
    gate: AdminGate,
    metrics: SharedMetrics,
    /// Index of the first event not yet folded into the metrics.
    observed: usize,
}

impl LedgerActor {
    async fn run(mut self, mut inbox: mpsc::Receiver<LedgerCommand>) {
        let ledger_id = self.ledger.ledger_id();
        info!(ledger = ledger_id, "ledger actor started");
        while let Some(command) = inbox.recv().await {
            self.handle(command);
            self.observe_events();
        }
        info!(ledger = ledger_id, "ledger actor stopped");
    }

    fn handle(&mut self, command: LedgerCommand) {
        // A dropped reply receiver means the caller stopped waiting; the
        // operation has still been applied.
        match command {
            LedgerCommand::Wrap {
                caller,
                recipient,
                amount,
                reply,
            } => {
                let _ = reply.send(self.ledger.wrap(&caller, &recipient, amount));
            }
            LedgerCommand::Unwrap {
                caller,
                recipient,
                amount,
                reply,
            } => {
                let _ = reply.send(self.ledger.unwrap(&caller, &recipient, amount));
            }
            LedgerCommand::HarvestFees { reply } => {
                let _ = reply.send(self.ledger.harvest_fees());
            }
            LedgerCommand::Send {
                caller,
                recipient,
                dest_ledger_id,
                amount,
                options,
                value,
                reply,
            } => {
                let _ = reply.send(self.ledger.send(
                    &caller,
                    &recipient,
                    dest_ledger_id,
                    amount,
                    options,
                    value,
                ));
            }
            LedgerCommand::SendToVault {
                caller,
                request,
                gas_limit,
                refund_address,
                value,
                reply,
            } => {
                let _ = reply.send(self.ledger.send_to_vault(
                    &caller,
                    request,
                    gas_limit,
                    refund_address,
                    value,
                ));
            }
            LedgerCommand::RetrieveFromVault {
                caller,
                request,
                adapter_params,
                value,
                reply,
            } => {
                let _ = reply.send(self.ledger.retrieve_from_vault(
                    &caller,
                    request,
                    Address::ZERO,
                    adapter_params,
                    value,
                ));
            }
            LedgerCommand::Deliver { packet, reply } => {
                let result = self.ledger.handle_packet(&packet);
                if let Err(e) = &result {
                    self.metrics.messages_rejected_total.inc();
                    warn!(
                        ledger = self.ledger.ledger_id(),
                        packet = %packet.id_hex(),
                        error = %e,
                        "packet rejected"
                    );
                }
                let _ = reply.send(result);
            }
            LedgerCommand::Admin {
                caller,
                call,
                allow_failure,
                reply,
            } => {
                let _ = reply.send(self.gate.execute(
                    &caller,
                    &mut self.ledger,
                    call,
                    allow_failure,
                ));
            }
            LedgerCommand::Snapshot { reply } => {
                let _ = reply.send(self.ledger.snapshot());
            }
            LedgerCommand::Account { account, reply } => {
                let _ = reply.send(self.ledger.account(&account));
            }
            LedgerCommand::Events { reply } => {
                let _ = reply.send(self.ledger.events().to_vec());
            }
        }
    }

    fn observe_events(&mut self) {
        let events = self.ledger.events();
        for event in &events[self.observed..] {
            self.metrics.observe(event);
        }
        self.observed = events.len();
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable client for one ledger actor.
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    ledger_id: LedgerId,
    tx: mpsc::Sender<LedgerCommand>,
}

/// Moves `ledger` into a new actor task.
pub fn spawn_ledger(
    ledger: BridgeLedger,
    gate: AdminGate,
    metrics: SharedMetrics,
) -> (LedgerHandle, JoinHandle<()>) {
    let ledger_id = ledger.ledger_id();
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    let actor = LedgerActor {
        ledger,
        gate,
        metrics,
        observed: 0,
    };
    let task = tokio::spawn(actor.run(rx));
    (LedgerHandle { ledger_id, tx }, task)
}

impl LedgerHandle {
    pub fn ledger_id(&self) -> LedgerId {
        self.ledger_id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LedgerCommand,
    ) -> Result<T, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| ActorError::Closed(self.ledger_id))?;
        rx.await.map_err(|_| ActorError::Closed(self.ledger_id))
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> LedgerCommand,
    ) -> Result<T, ActorError> {
        Ok(self.request(build).await??)
    }

    pub async fn wrap(
        &self,
        caller: Address,
        recipient: Address,
        amount: Amount,
    ) -> Result<Amount, ActorError> {
        self.call(|reply| LedgerCommand::Wrap {
            caller,
            recipient,
            amount,
            reply,
        })
        .await
    }

    pub async fn unwrap(
        &self,
        caller: Address,
        recipient: Address,
        amount: Amount,
    ) -> Result<(), ActorError> {
        self.call(|reply| LedgerCommand::Unwrap {
            caller,
            recipient,
            amount,
            reply,
        })
        .await
    }

    pub async fn harvest_fees(&self) -> Result<Amount, ActorError> {
        self.call(|reply| LedgerCommand::HarvestFees { reply }).await
    }

    pub async fn send(
        &self,
        caller: Address,
        recipient: Address,
        dest_ledger_id: LedgerId,
        amount: Amount,
        options: DispatchOptions,
        value: Amount,
    ) -> Result<DispatchReceipt, ActorError> {
        self.call(|reply| LedgerCommand::Send {
            caller,
            recipient,
            dest_ledger_id,
            amount,
            options,
            value,
            reply,
        })
        .await
    }

    pub async fn send_to_vault(
        &self,
        caller: Address,
        request: VaultRequest,
        gas_limit: u64,
        refund_address: Address,
        value: Amount,
    ) -> Result<DispatchReceipt, ActorError> {
        self.call(|reply| LedgerCommand::SendToVault {
            caller,
            request,
            gas_limit,
            refund_address,
            value,
            reply,
        })
        .await
    }

    pub async fn retrieve_from_vault(
        &self,
        caller: Address,
        request: VaultRequest,
        adapter_params: Vec<u8>,
        value: Amount,
    ) -> Result<DispatchReceipt, ActorError> {
        self.call(|reply| LedgerCommand::RetrieveFromVault {
            caller,
            request,
            adapter_params,
            value,
            reply,
        })
        .await
    }

    /// Delivers `packet` and waits for the outcome.
    pub async fn deliver(&self, packet: Packet) -> Result<ReceiveOutcome, ActorError> {
        self.call(|reply| LedgerCommand::Deliver { packet, reply })
            .await
    }

    #[allow(dead_code)]
    pub async fn admin(
        &self,
        caller: Address,
        call: AdminCall,
        allow_failure: bool,
    ) -> Result<AdminOutcome, ActorError> {
        self.call(|reply| LedgerCommand::Admin {
            caller,
            call,
            allow_failure,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<LedgerSnapshot, ActorError> {
        self.request(|reply| LedgerCommand::Snapshot { reply }).await
    }

    pub async fn account(&self, account: Address) -> Result<AccountSnapshot, ActorError> {
        self.request(|reply| LedgerCommand::Account { account, reply })
            .await
    }

    pub async fn events(&self) -> Result<Vec<BridgeEvent>, ActorError> {
        self.request(|reply| LedgerCommand::Events { reply }).await
    }
}

// ---------------------------------------------------------------------------
// Relay router
// ---------------------------------------------------------------------------

/// Handle to the running router task.
pub struct RouterHandle {
    routed: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl RouterHandle {
    /// Waits until at least `count` packets have been routed. Returns
    /// `false` if the router stopped first.
    pub async fn wait_routed(&mut self, count: u64) -> bool {
        self.routed.wait_for(|routed| *routed >= count).await.is_ok()
    }

    /// Waits for the router task to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "relay router task failed");
        }
    }
}

/// Spawns the task that moves packets from `relay` into ledger actors.
///
/// Packets for a ledger without a route are dropped with a warning. Stored
/// packets are requeued every `retry_every`. The task exits when
/// `shutdown` flips to `true` or its sender is dropped.
pub fn spawn_router(
    relay: Arc<InMemoryRelay>,
    routes: HashMap<LedgerId, LedgerHandle>,
    metrics: SharedMetrics,
    retry_every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> RouterHandle {
    let (routed_tx, routed) = watch::channel(0u64);
    let task = tokio::spawn(async move {
        info!(routes = routes.len(), "relay router started");
        let mut retry = interval_at(Instant::now() + retry_every, retry_every);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            while let Some(packet) = relay.next_packet() {
                metrics.pending_packets.set(relay.pending() as i64);
                route_packet(&relay, &routes, packet).await;
                metrics.stored_packets.set(relay.stored() as i64);
                routed_tx.send_modify(|n| *n += 1);
            }

            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = relay.packet_ready() => {}
                _ = retry.tick() => {
                    let requeued = relay.retry_stored();
                    if requeued > 0 {
                        debug!(requeued, "retrying stored packets");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(routed = *routed_tx.borrow(), "relay router stopped");
    });
    RouterHandle { routed, task }
}

async fn route_packet(
    relay: &InMemoryRelay,
    routes: &HashMap<LedgerId, LedgerHandle>,
    packet: Packet,
) {
    let packet_id = packet.id_hex();
    if relay.is_blocked(&packet) {
        relay.store(packet, "an earlier packet on its path is stored");
        return;
    }
    let Some(handle) = routes.get(&packet.dest_ledger) else {
        warn!(packet = %packet_id, dest = packet.dest_ledger, "no route for packet");
        return;
    };

    debug!(packet = %packet_id, dest = packet.dest_ledger, "routing packet");
    match handle.deliver(packet.clone()).await {
        Ok(outcome) => {
            debug!(packet = %packet_id, failed = outcome.is_failed(), "packet delivered");
        }
        Err(ActorError::Bridge(err)) if err.is_retryable() => {
            relay.store(packet, &err.to_string());
        }
        Err(e) => warn!(packet = %packet_id, error = %e, "packet dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devnet::{Devnet, DEVNET_ASSET_ID};
    use crate::metrics::NodeMetrics;
    use omniwrap_protocol::config::{DevnetConfig, DEVNET_ORIGIN_LEDGER, DEVNET_PEER_LEDGER};
    use omniwrap_protocol::AdapterParams;

    struct Running {
        origin: LedgerHandle,
        peer: LedgerHandle,
        relay: Arc<InMemoryRelay>,
        metrics: SharedMetrics,
        router: RouterHandle,
        shutdown: watch::Sender<bool>,
        user: Address,
    }

    async fn start() -> Running {
        let mut devnet = Devnet::build(&DevnetConfig::default()).unwrap();
        let user = Address::derive("user");
        devnet.seed_account(&user, 1_000_000, 50_000_000).unwrap();

        let metrics = Arc::new(NodeMetrics::new().unwrap());
        let relay = devnet.relay.clone();
        let gate = devnet.gate;
        let mut routes = HashMap::new();
        for ledger in devnet.ledgers {
            let (handle, _task) = spawn_ledger(ledger, gate, metrics.clone());
            routes.insert(handle.ledger_id(), handle);
        }
        let origin = routes[&DEVNET_ORIGIN_LEDGER].clone();
        let peer = routes[&DEVNET_PEER_LEDGER].clone();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let router = spawn_router(
            relay.clone(),
            routes,
            metrics.clone(),
            Duration::from_secs(3600),
            shutdown_rx,
        );

        Running {
            origin,
            peer,
            relay,
            metrics,
            router,
            shutdown,
            user,
        }
    }

    /// Waits until every queued packet has been delivered or stored.
    async fn settle(run: &mut Running) {
        loop {
            let enqueued = run.relay.enqueued();
            assert!(run.router.wait_routed(enqueued).await);
            if run.relay.enqueued() == enqueued {
                break;
            }
        }
    }

    #[tokio::test]
    async fn wrap_and_send_through_actors() {
        let mut run = start().await;
        let user = run.user;

        let minted = run.origin.wrap(user, user, 100_000).await.unwrap();
        assert_eq!(minted, 99_500);

        run.origin
            .send(user, user, 10, 40_000, DispatchOptions::refund_to(user), 5_000_000)
            .await
            .unwrap();
        settle(&mut run).await;

        assert_eq!(run.peer.account(user).await.unwrap().wrapped_balance, 40_000);
        assert_eq!(run.origin.account(user).await.unwrap().wrapped_balance, 59_500);
        assert_eq!(run.metrics.messages_dispatched_total.get(), 1);
        assert_eq!(run.metrics.messages_delivered_total.get(), 1);
        assert_eq!(run.metrics.wrapped_volume_total.get(), 99_500);
    }

    #[tokio::test]
    async fn rejected_operation_surfaces_bridge_error() {
        let run = start().await;
        let err = run.peer.wrap(run.user, run.user, 10).await.unwrap_err();
        assert!(matches!(
            err,
            ActorError::Bridge(BridgeError::WrongLedgerKind { ledger_id: 10 })
        ));
    }

    #[tokio::test]
    async fn vault_round_trip_settles() {
        let mut run = start().await;
        let user = run.user;
        run.origin.wrap(user, user, 100_000).await.unwrap();

        let deposit = VaultRequest {
            amount: 10_000,
            asset_id: DEVNET_ASSET_ID,
            dest_ledger_id: 10,
            use_strategy: false,
        };
        run.origin
            .send_to_vault(user, deposit, 200_000, user, 5_000_000)
            .await
            .unwrap();
        settle(&mut run).await;
        assert_eq!(run.origin.account(user).await.unwrap().wrapped_balance, 89_500);

        // The return trip is paid from the airdrop credited to the peer.
        let params = AdapterParams::Airdrop {
            gas_limit: 200_000,
            amount: 1_000_000,
            recipient: run.peer.snapshot().await.unwrap().address,
        }
        .encode();
        run.origin
            .retrieve_from_vault(user, deposit, params, 5_000_000)
            .await
            .unwrap();
        settle(&mut run).await;

        assert_eq!(run.origin.account(user).await.unwrap().wrapped_balance, 99_500);
        assert_eq!(run.peer.snapshot().await.unwrap().total_wrapped_supply, 0);
        assert_eq!(run.metrics.messages_dispatched_total.get(), 3);
    }

    #[tokio::test]
    async fn direct_delivery_reports_replay() {
        let run = start().await;
        let user = run.user;
        run.shutdown.send(true).unwrap();
        run.router.join().await;

        run.origin.wrap(user, user, 1_000).await.unwrap();
        run.origin
            .send(user, user, 10, 500, DispatchOptions::refund_to(user), 5_000_000)
            .await
            .unwrap();
        let packet = run.relay.next_packet().unwrap();

        let outcome = run.peer.deliver(packet.clone()).await.unwrap();
        assert!(!outcome.is_failed());
        let err = run.peer.deliver(packet).await.unwrap_err();
        assert!(matches!(
            err,
            ActorError::Bridge(BridgeError::ReplayedMessage { .. })
        ));
        assert_eq!(run.metrics.messages_rejected_total.get(), 1);
    }

    #[tokio::test]
    async fn admin_calls_go_through_the_gate() {
        let run = start().await;
        let err = run
            .origin
            .admin(run.user, AdminCall::SetFeeRate { fee_rate_bps: 10 }, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ActorError::Bridge(BridgeError::Unauthorized(_))));

        let owner = Address::derive("omniwrap/devnet/owner");
        run.origin
            .admin(owner, AdminCall::SetFeeRate { fee_rate_bps: 10 }, false)
            .await
            .unwrap();
        assert_eq!(run.origin.snapshot().await.unwrap().fee_rate_bps, 10);
    }

    #[tokio::test]
    async fn refused_packet_is_stored_and_redelivered_in_order() {
        let mut run = start().await;
        let user = run.user;
        let owner = Address::derive("omniwrap/devnet/owner");
        let origin_address = run.origin.snapshot().await.unwrap().address;
        run.peer
            .admin(
                owner,
                AdminCall::RemovePeer {
                    remote_ledger_id: DEVNET_ORIGIN_LEDGER,
                },
                false,
            )
            .await
            .unwrap();

        run.origin.wrap(user, user, 10_000).await.unwrap();
        run.origin
            .send(user, user, 10, 1_000, DispatchOptions::refund_to(user), 5_000_000)
            .await
            .unwrap();
        settle(&mut run).await;
        assert_eq!(run.relay.stored(), 1);
        assert_eq!(run.peer.snapshot().await.unwrap().total_wrapped_supply, 0);

        run.peer
            .admin(
                owner,
                AdminCall::SetPeer {
                    remote_ledger_id: DEVNET_ORIGIN_LEDGER,
                    remote_address: origin_address,
                },
                false,
            )
            .await
            .unwrap();
        run.origin
            .send(user, user, 10, 500, DispatchOptions::refund_to(user), 5_000_000)
            .await
            .unwrap();
        settle(&mut run).await;
        // Blocked behind the first one.
        assert_eq!(run.relay.stored(), 2);

        assert_eq!(run.relay.retry_stored(), 2);
        settle(&mut run).await;

        assert_eq!(run.peer.account(user).await.unwrap().wrapped_balance, 1_500);
        assert_eq!(run.relay.stored(), 0);
        assert_eq!(run.metrics.stored_packets.get(), 0);
        assert_eq!(run.metrics.messages_delivered_total.get(), 2);
        assert_eq!(run.metrics.messages_rejected_total.get(), 1);
    }
}
