//! # Cross-Ledger Relay
//!
//! The relay is the only channel between ledger instances. The sending side
//! asks for a [`Relay::quote`], then calls [`Relay::dispatch`] with value
//! attached; the relay keeps the fee, reports the refund, assigns the
//! per-path nonce and queues a [`Packet`]. Some time later the packet is
//! handed to the destination ledger's `handle_packet`.
//!
//! ```text
//!   source ledger            relay                 destination ledger
//!   ─────────────            ─────                 ──────────────────
//!   quote(dest, payload) ──► fee
//!   dispatch(req, value) ──► nonce++, queue ──┐
//!        ◄── receipt{nonce, fee, refund}      │   (arbitrary delay)
//!                                             └──► handle_packet: admit, airdrop, apply
//! ```
//!
//! Delivery is ordered per `(source ledger, source address, destination
//! ledger, destination address)` path. A packet the destination refuses
//! for a retryable reason is stored by the relay, blocks its path, and is
//! redelivered in nonce order by `retry_stored`.

pub mod adapter;
pub mod memory;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::blake3_hash_multi;
use crate::types::{Address, Amount, LedgerId};

pub use adapter::AdapterParams;
pub use memory::InMemoryRelay;

/// Failures reported by the relay at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// No ledger with this id is reachable through the relay.
    #[error("unknown destination ledger {0}")]
    UnknownDestination(LedgerId),

    /// The attached value does not cover the quoted fee.
    #[error("insufficient relay fee: required {required}, provided {provided}")]
    InsufficientFee {
        /// Quoted fee.
        required: Amount,
        /// Value attached.
        provided: Amount,
    },

    /// Only native-currency payment is supported.
    #[error("unsupported payment currency {0}")]
    UnsupportedPaymentCurrency(Address),

    /// Adapter parameters could not be parsed.
    #[error("malformed adapter params: {0}")]
    MalformedAdapterParams(String),

    /// Adapter parameters carry an unknown type tag.
    #[error("unsupported adapter params type {0}")]
    UnsupportedAdapterParams(u16),
}

/// Caller-supplied dispatch options, forwarded to the relay unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOptions {
    /// Account credited with any unused attached value.
    pub refund_address: Address,
    /// Payment-currency selector. [`Address::ZERO`] means native currency.
    pub zro_payment_address: Address,
    /// Packed [`AdapterParams`]; opaque to the bridge.
    pub adapter_params: Vec<u8>,
}

impl DispatchOptions {
    /// Native payment, default adapter parameters, refunds to `refund_address`.
    pub fn refund_to(refund_address: Address) -> Self {
        Self {
            refund_address,
            zro_payment_address: Address::ZERO,
            adapter_params: Vec::new(),
        }
    }

    /// Replaces the adapter parameters.
    pub fn with_adapter_params(mut self, params: AdapterParams) -> Self {
        self.adapter_params = params.encode();
        self
    }
}

/// Everything the relay needs to send one message.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Ledger the message leaves from.
    pub src_ledger: LedgerId,
    /// Bridge instance address on the source ledger.
    pub src_address: Address,
    /// Ledger the message is addressed to.
    pub dest_ledger: LedgerId,
    /// Bridge instance address on the destination ledger.
    pub dest_address: Address,
    /// Encoded bridge payload.
    pub payload: Vec<u8>,
    /// Caller options.
    pub options: DispatchOptions,
    /// Native value attached to pay for delivery.
    pub value: Amount,
}

/// What the relay returns for an accepted dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    /// Nonce assigned on this path.
    pub nonce: u64,
    /// Fee consumed.
    pub fee: Amount,
    /// Attached value not consumed; the sender credits it to the refund
    /// address.
    pub refund: Amount,
}

/// Native currency the relay delivers on the destination before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airdrop {
    /// Account credited on the destination ledger.
    pub recipient: Address,
    /// Native units delivered.
    pub amount: Amount,
}

/// A message in flight between two ledgers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Source ledger.
    pub src_ledger: LedgerId,
    /// Source bridge instance.
    pub src_address: Address,
    /// Destination ledger.
    pub dest_ledger: LedgerId,
    /// Destination bridge instance.
    pub dest_address: Address,
    /// Per-path nonce, starting at 1.
    pub nonce: u64,
    /// Encoded bridge payload.
    pub payload: Vec<u8>,
    /// Gas the relay will provide for destination execution.
    pub gas_limit: u64,
    /// Optional native airdrop.
    pub airdrop: Option<Airdrop>,
}

impl Packet {
    /// Content identifier: `BLAKE3(src || src_address || dest || nonce)`.
    pub fn id(&self) -> [u8; 32] {
        blake3_hash_multi(&[
            &self.src_ledger.to_be_bytes(),
            self.src_address.as_bytes(),
            &self.dest_ledger.to_be_bytes(),
            &self.nonce.to_be_bytes(),
        ])
    }

    /// Hex-encoded [`Packet::id`], for logs.
    pub fn id_hex(&self) -> String {
        hex::encode(self.id())
    }
}

/// The transport between ledger instances.
pub trait Relay: Send + Sync {
    /// Native fee required to dispatch `payload` to `dest_ledger` with the
    /// given options.
    fn quote(
        &self,
        dest_ledger: LedgerId,
        payload: &[u8],
        options: &DispatchOptions,
    ) -> Result<Amount, RelayError>;

    /// Accepts a message for delivery. On success the fee has been taken
    /// and the nonce assigned; the message cannot be recalled.
    fn dispatch(&self, request: DispatchRequest) -> Result<DispatchReceipt, RelayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(nonce: u64) -> Packet {
        Packet {
            src_ledger: 1,
            src_address: Address::derive("a"),
            dest_ledger: 2,
            dest_address: Address::derive("b"),
            nonce,
            payload: vec![1, 2, 3],
            gas_limit: 200_000,
            airdrop: None,
        }
    }

    #[test]
    fn packet_id_depends_on_nonce() {
        assert_ne!(packet(1).id(), packet(2).id());
        assert_eq!(packet(1).id_hex(), packet(1).id_hex());
    }

    #[test]
    fn refund_to_uses_native_payment() {
        let opts = DispatchOptions::refund_to(Address::derive("alice"));
        assert!(opts.zro_payment_address.is_zero());
        assert!(opts.adapter_params.is_empty());
        let opts = opts.with_adapter_params(AdapterParams::Gas { gas_limit: 5 });
        assert_eq!(opts.adapter_params.len(), 34);
    }
}
