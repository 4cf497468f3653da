// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # omniwrap Protocol — Shared Primitives
//!
//! Everything the bridge ledgers agree on without trusting each other:
//! identifiers, the wire format of bridge messages, the relay's dispatch
//! contract, and the collaborator interfaces a ledger instance is wired to.
//!
//! ## Modules
//!
//! - **types** — `LedgerId`, `Address`, `AssetId`, `Amount`.
//! - **hash** — BLAKE3 helpers for address derivation and packet ids.
//! - **message** — the `BridgePayload` enum and its versioned codec.
//! - **relay** — dispatch options, adapter parameters, packets, and the
//!   in-process relay.
//! - **asset** — the underlying fungible asset interface plus an in-memory
//!   allowance book.
//! - **yield_vault** — the remote vault service interface plus an in-memory
//!   vault.
//! - **config** — protocol constants and the devnet deployment file.
//!
//! The collaborator implementations here are devnet doubles. Ledger logic
//! in `omniwrap-contracts` only ever sees the traits.

pub mod asset;
pub mod config;
pub mod hash;
pub mod message;
pub mod relay;
pub mod types;
pub mod yield_vault;

pub use asset::{AssetError, InMemoryAsset, UnderlyingAsset};
pub use message::{BridgePayload, CodecError, MessageKind};
pub use relay::{
    AdapterParams, DispatchOptions, DispatchReceipt, InMemoryRelay, Packet, Relay, RelayError,
};
pub use types::{Address, Amount, AssetId, LedgerId};
pub use yield_vault::{InMemoryVault, VaultError, VaultService};
