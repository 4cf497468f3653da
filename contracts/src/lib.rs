// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # omniwrap Bridge Contracts
//!
//! The bridge logic deployed once per ledger. A [`BridgeLedger`] wraps a
//! fungible asset on its origin ledger, moves the wrapped representation
//! to and from peer ledgers through a relay, and forwards it into remote
//! vaults on a holder's behalf.
//!
//! - **wrapped_asset**: fee-bearing wrap, fee-free unwrap, fee harvest.
//! - **peer_registry**: which remote bridge instances are trusted.
//! - **bridge**: outbound dispatch, inbound admission and replay safety.
//! - **vault_forwarder**: vault deposits and withdrawals across ledgers,
//!   stranded-funds recovery.
//! - **fee_governor**: executor-gated administration.
//!
//! ## Design Principles
//!
//! 1. Conservation: wrapped supply plus accrued fees never exceeds the
//!    underlying held in custody. All arithmetic is checked.
//! 2. An operation that returns `Err` changed nothing.
//! 3. Inbound messages are admitted only from a trusted peer and only in
//!    nonce order; once admitted, their nonce is spent whatever happens.
//! 4. Collaborators (asset, relay, vault, authority) are trait objects,
//!    so any implementation can be wired in.

pub mod bridge;
pub mod error;
pub mod events;
pub mod fee_governor;
pub mod ledger;
pub mod peer_registry;
pub mod vault_forwarder;
pub mod wrapped_asset;

pub use bridge::{InboundNonces, ReceiveOutcome};
pub use error::BridgeError;
pub use events::BridgeEvent;
pub use fee_governor::{AdminCall, AdminGate, AdminOutcome, Authority, ExecutorAuthority};
pub use ledger::{AccountSnapshot, BridgeLedger, FailedMessage, LedgerParams, LedgerSnapshot};
pub use peer_registry::{Peer, PeerRegistry};
pub use vault_forwarder::{StrandedFunds, VaultRequest};
pub use wrapped_asset::{estimate_fee, WrappedAsset};
