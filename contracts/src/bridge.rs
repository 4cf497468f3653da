//! # Bridge Messaging
//!
//! Outbound: `send` burns wrapped units locally and dispatches a
//! `Transfer` payload through the relay to the trusted peer on the
//! destination ledger.
//!
//! Inbound: the relay hands a [`Packet`] to `handle_packet`, which checks
//! the route and then admits it like `receive`, carrying any native
//! airdrop along. Both run in two phases:
//!
//! 1. **Admission.** The `(source ledger, sender)` pair must be a trusted
//!    peer, the nonce must be exactly `last + 1`, and a mint must fit under
//!    the supply cap. A rejection returns `Err` and changes nothing.
//! 2. **Execution.** The nonce is consumed, any native airdrop carried by
//!    the packet is credited, and the payload applied. A payload that fails
//!    to decode, or a vault step that fails, is reported as
//!    [`ReceiveOutcome::Failed`] so the path stays unblocked.
//!
//! Early packets are refused, not buffered. Keeping a refused packet and
//! redelivering it in order is the relay's job.
//!
//! ## Gas accounting
//!
//! Every dispatch carries native `value`. The payer must hold it, the
//! relay quote must not exceed it, and `value - fee` is credited to the
//! refund address once the relay accepts the packet.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info, warn};

use omniwrap_protocol::hash::blake3_hex;
use omniwrap_protocol::relay::{Airdrop, DispatchRequest};
use omniwrap_protocol::{
    Address, Amount, AssetId, BridgePayload, DispatchOptions, DispatchReceipt, LedgerId, Packet,
    RelayError,
};

use crate::error::BridgeError;
use crate::events::BridgeEvent;
use crate::ledger::{BridgeLedger, FailedMessage};
use crate::peer_registry::Peer;

// ---------------------------------------------------------------------------
// Inbound nonces
// ---------------------------------------------------------------------------

/// Last consumed nonce per `(source ledger, sender)` path.
#[derive(Debug, Clone, Default)]
pub struct InboundNonces {
    last: HashMap<(LedgerId, Address), u64>,
}

impl InboundNonces {
    /// Last consumed nonce; 0 when nothing has arrived on the path.
    pub fn last_consumed(&self, source_ledger_id: LedgerId, sender: &Address) -> u64 {
        self.last
            .get(&(source_ledger_id, *sender))
            .copied()
            .unwrap_or(0)
    }

    /// Accepts exactly `last + 1`.
    pub fn check(
        &self,
        source_ledger_id: LedgerId,
        sender: &Address,
        nonce: u64,
    ) -> Result<(), BridgeError> {
        let last = self.last_consumed(source_ledger_id, sender);
        if nonce <= last {
            return Err(BridgeError::ReplayedMessage {
                ledger_id: source_ledger_id,
                nonce,
                last,
            });
        }
        let expected = last + 1;
        if nonce != expected {
            return Err(BridgeError::UnexpectedNonce {
                ledger_id: source_ledger_id,
                expected,
                got: nonce,
            });
        }
        Ok(())
    }

    pub(crate) fn consume(&mut self, source_ledger_id: LedgerId, sender: &Address, nonce: u64) {
        self.last.insert((source_ledger_id, *sender), nonce);
    }
}

/// Result of an admitted inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Wrapped units credited to `recipient`.
    Credited { recipient: Address, amount: Amount },
    /// Units deposited into the vault under `account`.
    VaultDeposited {
        account: Address,
        asset_id: AssetId,
        amount: Amount,
    },
    /// Units withdrawn from the vault and dispatched back to `owner`.
    VaultWithdrawn {
        owner: Address,
        amount: Amount,
        return_nonce: u64,
    },
    /// The nonce was consumed but the message could not be applied.
    Failed(BridgeError),
}

impl ReceiveOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ReceiveOutcome::Failed(_))
    }
}

// ---------------------------------------------------------------------------
// Ledger operations
// ---------------------------------------------------------------------------

impl BridgeLedger {
    /// Burns `amount` from `caller` and dispatches a transfer to
    /// `recipient` on `dest_ledger_id`. `value` is the native currency
    /// attached to pay the relay.
    pub fn send(
        &mut self,
        caller: &Address,
        recipient: &Address,
        dest_ledger_id: LedgerId,
        amount: Amount,
        options: DispatchOptions,
        value: Amount,
    ) -> Result<DispatchReceipt, BridgeError> {
        if amount == 0 {
            return Err(BridgeError::ZeroAmount);
        }
        let peer = self.trusted_peer(dest_ledger_id)?;
        let payload = BridgePayload::Transfer {
            recipient: *recipient,
            amount,
        };
        self.debit_and_dispatch(caller, caller, &peer, amount, &payload, options, value)
    }

    /// Relay fee for dispatching `payload` to the peer on `dest_ledger_id`.
    pub fn quote(
        &self,
        dest_ledger_id: LedgerId,
        payload: &BridgePayload,
        options: &DispatchOptions,
    ) -> Result<Amount, BridgeError> {
        let peer = self.trusted_peer(dest_ledger_id)?;
        let bytes = payload.encode()?;
        Ok(self.relay.quote(peer.remote_ledger_id, &bytes, options)?)
    }

    /// Burns `amount` from `debit_from` and dispatches `payload` paid by
    /// `gas_payer`. The burn is validated before the dispatch and applied
    /// only once the relay has accepted the packet.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn debit_and_dispatch(
        &mut self,
        debit_from: &Address,
        gas_payer: &Address,
        peer: &Peer,
        amount: Amount,
        payload: &BridgePayload,
        options: DispatchOptions,
        value: Amount,
    ) -> Result<DispatchReceipt, BridgeError> {
        self.wrapped.ensure_burnable(debit_from, amount)?;
        let receipt = self.dispatch_message(gas_payer, peer, payload, options, value)?;
        self.wrapped.burn(debit_from, amount)?;
        Ok(receipt)
    }

    /// Encodes and dispatches `payload` to `peer`, settling native value.
    pub(crate) fn dispatch_message(
        &mut self,
        payer: &Address,
        peer: &Peer,
        payload: &BridgePayload,
        options: DispatchOptions,
        value: Amount,
    ) -> Result<DispatchReceipt, BridgeError> {
        let bytes = payload.encode()?;
        self.ensure_native(payer, value)?;

        let fee = self.relay.quote(peer.remote_ledger_id, &bytes, &options)?;
        if fee > value {
            return Err(RelayError::InsufficientFee {
                required: fee,
                provided: value,
            }
            .into());
        }

        let refund_address = options.refund_address;
        let receipt = self.relay.dispatch(DispatchRequest {
            src_ledger: self.ledger_id,
            src_address: self.address,
            dest_ledger: peer.remote_ledger_id,
            dest_address: peer.trusted_remote_address,
            payload: bytes,
            options,
            value,
        })?;

        self.debit_native(payer, value)?;
        self.credit_native(&refund_address, receipt.refund);

        let kind = payload.kind();
        info!(
            ledger = self.ledger_id,
            dest = peer.remote_ledger_id,
            nonce = receipt.nonce,
            %kind,
            amount = payload.amount(),
            fee = receipt.fee,
            refund = receipt.refund,
            "message sent"
        );
        self.emit(BridgeEvent::MessageSent {
            dest_ledger_id: peer.remote_ledger_id,
            nonce: receipt.nonce,
            kind,
        });
        Ok(receipt)
    }

    /// Relay entry point for a message from `source_ledger_id`.
    pub fn receive(
        &mut self,
        source_ledger_id: LedgerId,
        sender: &Address,
        nonce: u64,
        payload: &[u8],
    ) -> Result<ReceiveOutcome, BridgeError> {
        self.admit_and_apply(source_ledger_id, sender, nonce, payload, None)
    }

    /// Delivers a relay packet. The airdrop it carries is paid when its
    /// nonce is consumed, so a refused packet pays nothing and a replayed
    /// one cannot pay twice.
    pub fn handle_packet(&mut self, packet: &Packet) -> Result<ReceiveOutcome, BridgeError> {
        if packet.dest_ledger != self.ledger_id || packet.dest_address != self.address {
            return Err(BridgeError::MisroutedPacket {
                ledger_id: packet.dest_ledger,
                address: packet.dest_address,
            });
        }
        self.admit_and_apply(
            packet.src_ledger,
            &packet.src_address,
            packet.nonce,
            &packet.payload,
            packet.airdrop,
        )
    }

    pub fn last_inbound_nonce(&self, source_ledger_id: LedgerId, sender: &Address) -> u64 {
        self.inbound.last_consumed(source_ledger_id, sender)
    }

    fn admit_and_apply(
        &mut self,
        source_ledger_id: LedgerId,
        sender: &Address,
        nonce: u64,
        payload: &[u8],
        airdrop: Option<Airdrop>,
    ) -> Result<ReceiveOutcome, BridgeError> {
        if !self.peers.is_trusted(source_ledger_id, sender) {
            warn!(
                ledger = self.ledger_id,
                source = source_ledger_id,
                sender = %sender,
                nonce,
                "rejected message from untrusted source"
            );
            return Err(BridgeError::UntrustedSource {
                ledger_id: source_ledger_id,
                sender: *sender,
            });
        }
        if let Err(err) = self.inbound.check(source_ledger_id, sender, nonce) {
            warn!(ledger = self.ledger_id, source = source_ledger_id, nonce, error = %err, "rejected message");
            return Err(err);
        }

        let decoded = match BridgePayload::decode(payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.consume_nonce(source_ledger_id, sender, nonce, airdrop);
                self.record_failed_message(source_ledger_id, sender, nonce, payload, err.to_string());
                return Ok(ReceiveOutcome::Failed(BridgeError::InvalidPayload(err)));
            }
        };

        // Everything below may fail only as a `ReceiveOutcome::Failed`,
        // except a supply overflow which is rejected before consumption.
        match &decoded {
            BridgePayload::Transfer { amount, .. } | BridgePayload::VaultDeposit { amount, .. } => {
                self.wrapped.ensure_mintable(*amount)?;
            }
            BridgePayload::VaultWithdraw { .. } => {}
        }

        self.consume_nonce(source_ledger_id, sender, nonce, airdrop);
        let kind = decoded.kind();
        debug!(ledger = self.ledger_id, source = source_ledger_id, nonce, %kind, "nonce consumed");
        self.emit(BridgeEvent::MessageReceived {
            source_ledger_id,
            nonce,
            kind,
        });

        let outcome = match decoded {
            BridgePayload::Transfer { recipient, amount } => match self.wrapped.mint(&recipient, amount) {
                Ok(()) => {
                    info!(
                        ledger = self.ledger_id,
                        source = source_ledger_id,
                        nonce,
                        recipient = %recipient,
                        amount,
                        "transfer credited"
                    );
                    ReceiveOutcome::Credited { recipient, amount }
                }
                Err(err) => ReceiveOutcome::Failed(err),
            },
            BridgePayload::VaultDeposit {
                recipient,
                amount,
                asset_id,
                use_strategy,
            } => self.on_vault_deposit(source_ledger_id, &recipient, amount, asset_id, use_strategy),
            BridgePayload::VaultWithdraw {
                owner,
                amount,
                asset_id,
                use_strategy,
            } => self.on_vault_withdraw(source_ledger_id, &owner, amount, asset_id, use_strategy),
        };
        Ok(outcome)
    }

    /// Spends `nonce` and pays the airdrop it carried. Runs once per nonce.
    fn consume_nonce(
        &mut self,
        source_ledger_id: LedgerId,
        sender: &Address,
        nonce: u64,
        airdrop: Option<Airdrop>,
    ) {
        self.inbound.consume(source_ledger_id, sender, nonce);
        if let Some(airdrop) = airdrop {
            self.credit_native(&airdrop.recipient, airdrop.amount);
        }
    }

    fn record_failed_message(
        &mut self,
        source_ledger_id: LedgerId,
        sender: &Address,
        nonce: u64,
        payload: &[u8],
        reason: String,
    ) {
        warn!(
            ledger = self.ledger_id,
            source = source_ledger_id,
            nonce,
            reason = %reason,
            "admitted message failed to decode"
        );
        self.failed_messages.insert(
            (source_ledger_id, nonce),
            FailedMessage {
                source_ledger_id,
                sender: *sender,
                nonce,
                payload_digest: blake3_hex(payload),
                reason: reason.clone(),
                recorded_at: Utc::now(),
            },
        );
        self.emit(BridgeEvent::MessageFailed {
            source_ledger_id,
            nonce,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_window_is_exactly_next() {
        let mut nonces = InboundNonces::default();
        let sender = Address::derive("peer");

        nonces.check(10, &sender, 1).unwrap();
        assert!(matches!(
            nonces.check(10, &sender, 2),
            Err(BridgeError::UnexpectedNonce { expected: 1, got: 2, .. })
        ));

        nonces.consume(10, &sender, 1);
        assert!(matches!(
            nonces.check(10, &sender, 1),
            Err(BridgeError::ReplayedMessage { nonce: 1, last: 1, .. })
        ));
        assert!(matches!(
            nonces.check(10, &sender, 0),
            Err(BridgeError::ReplayedMessage { .. })
        ));
        nonces.check(10, &sender, 2).unwrap();
    }

    #[test]
    fn paths_are_independent() {
        let mut nonces = InboundNonces::default();
        let a = Address::derive("a");
        let b = Address::derive("b");
        nonces.consume(10, &a, 5);
        assert_eq!(nonces.last_consumed(10, &a), 5);
        assert_eq!(nonces.last_consumed(10, &b), 0);
        assert_eq!(nonces.last_consumed(11, &a), 0);
    }

    #[test]
    fn outcome_failure_flag() {
        assert!(ReceiveOutcome::Failed(BridgeError::ZeroAmount).is_failed());
        assert!(!ReceiveOutcome::Credited {
            recipient: Address::ZERO,
            amount: 1
        }
        .is_failed());
    }
}
