//! Two-ledger harness shared by the integration tests.
//!
//! Ledger 1 is the origin and holds custody of the underlying asset.
//! Ledger 10 is a peer with a vault service attached. Packets sit in the
//! relay queue until a test calls `deliver`, which stores retryable
//! refusals back on the relay the way the node's router does.

#![allow(dead_code)]

use std::sync::Arc;

use omniwrap_contracts::{
    AdminCall, AdminGate, BridgeError, BridgeLedger, LedgerParams, ReceiveOutcome,
};
use omniwrap_protocol::config::RelayFeeSchedule;
use omniwrap_protocol::{
    Address, Amount, AssetId, DispatchOptions, InMemoryAsset, InMemoryRelay, InMemoryVault,
    LedgerId, Packet,
};

pub const ORIGIN: LedgerId = 1;
pub const PEER: LedgerId = 10;
pub const ASSET_ID: AssetId = 1;
/// Plenty of native currency for any single dispatch.
pub const GAS: Amount = 5_000_000;

pub struct Harness {
    pub relay: Arc<InMemoryRelay>,
    pub asset: Arc<InMemoryAsset>,
    pub vault: Arc<InMemoryVault>,
    pub gate: AdminGate,
    pub origin: BridgeLedger,
    pub peer: BridgeLedger,
    pub owner: Address,
    pub operator: Address,
    pub alice: Address,
    pub bob: Address,
}

impl Harness {
    pub fn new(fee_rate_bps: u64) -> Self {
        let relay = Arc::new(InMemoryRelay::new(RelayFeeSchedule::default()));
        relay.register_ledger(ORIGIN);
        relay.register_ledger(PEER);

        let asset = Arc::new(InMemoryAsset::new("TKN", 18));
        let vault = Arc::new(InMemoryVault::new(Address::derive("vault")));
        vault.add_asset(ASSET_ID);

        let owner = Address::derive("owner");
        let operator = Address::derive("operator");
        let gate = AdminGate::new(owner);

        let origin = BridgeLedger::origin(
            LedgerParams::new(ORIGIN, Address::derive("bridge/origin"), operator)
                .with_fee_rate(fee_rate_bps),
            asset.clone(),
            relay.clone(),
            gate.authority(),
        )
        .unwrap();
        let peer = BridgeLedger::peer(
            LedgerParams::new(PEER, Address::derive("bridge/peer"), operator)
                .with_fee_rate(fee_rate_bps),
            ORIGIN,
            relay.clone(),
            gate.authority(),
        )
        .unwrap()
        .with_vault(vault.clone());

        let alice = Address::derive("alice");
        let bob = Address::derive("bob");

        let mut harness = Self {
            relay,
            asset,
            vault,
            gate,
            origin,
            peer,
            owner,
            operator,
            alice,
            bob,
        };
        for who in [alice, bob] {
            harness.origin.fund_native(&who, 100 * GAS);
            harness.peer.fund_native(&who, 100 * GAS);
        }
        harness
    }

    /// Registers each instance as the other's trusted peer.
    pub fn trust_both(&mut self) {
        let peer_address = self.peer.address();
        let origin_address = self.origin.address();
        self.gate
            .execute(
                &self.owner,
                &mut self.origin,
                AdminCall::SetPeer {
                    remote_ledger_id: PEER,
                    remote_address: peer_address,
                },
                false,
            )
            .unwrap();
        self.gate
            .execute(
                &self.owner,
                &mut self.peer,
                AdminCall::SetPeer {
                    remote_ledger_id: ORIGIN,
                    remote_address: origin_address,
                },
                false,
            )
            .unwrap();
    }

    /// Mints underlying to `who`, approves the bridge, and wraps it all.
    /// Returns the wrapped amount received.
    pub fn wrap(&mut self, who: Address, amount: Amount) -> Amount {
        self.asset.mint(&who, amount).unwrap();
        self.asset.approve(&who, &self.origin.address(), amount);
        self.origin.wrap(&who, &who, amount).unwrap()
    }

    pub fn ledger_mut(&mut self, id: LedgerId) -> &mut BridgeLedger {
        match id {
            ORIGIN => &mut self.origin,
            PEER => &mut self.peer,
            other => panic!("no ledger {other}"),
        }
    }

    /// Delivers one queued packet.
    pub fn deliver_one(&mut self) -> Option<Result<ReceiveOutcome, BridgeError>> {
        let packet = self.relay.next_packet()?;
        let outcome = self.deliver_packet(&packet);
        if let Err(err) = &outcome {
            if err.is_retryable() {
                self.relay.store(packet, &err.to_string());
            }
        }
        Some(outcome)
    }

    /// Requeues everything the relay stored and delivers it.
    pub fn retry_stored(&mut self) -> Vec<Result<ReceiveOutcome, BridgeError>> {
        self.relay.retry_stored();
        self.deliver()
    }

    pub fn deliver_packet(&mut self, packet: &Packet) -> Result<ReceiveOutcome, BridgeError> {
        self.ledger_mut(packet.dest_ledger).handle_packet(packet)
    }

    /// Delivers until the relay queue is empty, including packets queued by
    /// deliveries. Returns every outcome in delivery order.
    pub fn deliver(&mut self) -> Vec<Result<ReceiveOutcome, BridgeError>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.deliver_one() {
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Native payment, default adapter params, refunds to `refund`.
pub fn opts(refund: Address) -> DispatchOptions {
    DispatchOptions::refund_to(refund)
}
