//! # Bridge Ledger
//!
//! One bridge instance deployed on one ledger. The struct owns every piece
//! of bridge state for that ledger: the wrapped asset, peer registry,
//! inbound nonce table, native gas balances, vault-forwarding bookkeeping
//! and the event log. Each public operation runs to completion under
//! `&mut self`, so a ledger executes one operation at a time and either
//! commits all of its effects or none.
//!
//! Behavior is split across modules by concern:
//!
//! | module | operations |
//! |--------|------------|
//! | `wrapped_asset` | `wrap`, `unwrap`, `harvest_fees`, `transfer`, `estimate_fee` |
//! | `peer_registry` | `set_peer`, `remove_peer` |
//! | `bridge` | `send`, `receive`, `handle_packet` |
//! | `vault_forwarder` | `send_to_vault`, `retrieve_from_vault`, `recover_stranded` |
//! | `fee_governor` | `set_fee_rate`, `apply_admin` |

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use omniwrap_protocol::config::{DEFAULT_DECIMALS, DEFAULT_FEE_RATE_BPS, FEE_DENOMINATOR_BPS};
use omniwrap_protocol::{Address, Amount, LedgerId, Relay, UnderlyingAsset, VaultService};

use crate::bridge::InboundNonces;
use crate::error::BridgeError;
use crate::events::BridgeEvent;
use crate::fee_governor::Authority;
use crate::peer_registry::{Peer, PeerRegistry};
use crate::vault_forwarder::ForwarderState;
use crate::wrapped_asset::WrappedAsset;

// ---------------------------------------------------------------------------
// Construction parameters
// ---------------------------------------------------------------------------

/// Static parameters of a ledger instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerParams {
    /// Ledger this instance runs on.
    pub ledger_id: LedgerId,
    /// Address of the bridge instance itself. Doubles as the custody
    /// account on the origin ledger and the holding account on peers.
    pub address: Address,
    /// Receives harvested fees.
    pub operator: Address,
    /// Initial fee rate in basis points.
    pub fee_rate_bps: u64,
    /// Decimals of the wrapped representation on peer ledgers. The origin
    /// takes its decimals from the underlying asset.
    pub decimals: u8,
}

impl LedgerParams {
    pub fn new(ledger_id: LedgerId, address: Address, operator: Address) -> Self {
        Self {
            ledger_id,
            address,
            operator,
            fee_rate_bps: DEFAULT_FEE_RATE_BPS,
            decimals: DEFAULT_DECIMALS,
        }
    }

    pub fn with_fee_rate(mut self, fee_rate_bps: u64) -> Self {
        self.fee_rate_bps = fee_rate_bps;
        self
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self
    }
}

/// An admitted inbound message whose payload did not decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedMessage {
    pub source_ledger_id: LedgerId,
    pub sender: Address,
    pub nonce: u64,
    /// Hex BLAKE3 digest of the raw payload.
    pub payload_digest: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// BridgeLedger
// ---------------------------------------------------------------------------

/// The bridge state machine for one ledger.
pub struct BridgeLedger {
    pub(crate) ledger_id: LedgerId,
    pub(crate) address: Address,
    pub(crate) operator: Address,
    pub(crate) wrapped: WrappedAsset,
    pub(crate) underlying: Option<Arc<dyn UnderlyingAsset>>,
    pub(crate) peers: PeerRegistry,
    pub(crate) inbound: InboundNonces,
    pub(crate) native: HashMap<Address, Amount>,
    pub(crate) relay: Arc<dyn Relay>,
    pub(crate) vault: Option<Arc<dyn VaultService>>,
    pub(crate) authority: Box<dyn Authority>,
    pub(crate) forwarder: ForwarderState,
    pub(crate) failed_messages: BTreeMap<(LedgerId, u64), FailedMessage>,
    events: Vec<BridgeEvent>,
}

impl fmt::Debug for BridgeLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeLedger")
            .field("ledger_id", &self.ledger_id)
            .field("address", &self.address)
            .field("wrapped", &self.wrapped)
            .field("peers", &self.peers.len())
            .field("vault", &self.vault.as_ref().map(|v| v.address()))
            .finish_non_exhaustive()
    }
}

impl BridgeLedger {
    /// Deploys the custody-holding instance on the asset's native ledger.
    pub fn origin(
        params: LedgerParams,
        underlying: Arc<dyn UnderlyingAsset>,
        relay: Arc<dyn Relay>,
        authority: Box<dyn Authority>,
    ) -> Result<Self, BridgeError> {
        let decimals = underlying.decimals();
        let wrapped = WrappedAsset::new(params.ledger_id, true, params.fee_rate_bps, decimals);
        Self::build(params, wrapped, Some(underlying), relay, authority)
    }

    /// Deploys a peer instance whose wrapped supply is backed by custody on
    /// `origin_ledger_id`.
    pub fn peer(
        params: LedgerParams,
        origin_ledger_id: LedgerId,
        relay: Arc<dyn Relay>,
        authority: Box<dyn Authority>,
    ) -> Result<Self, BridgeError> {
        let wrapped = WrappedAsset::new(
            origin_ledger_id,
            false,
            params.fee_rate_bps,
            params.decimals,
        );
        Self::build(params, wrapped, None, relay, authority)
    }

    fn build(
        params: LedgerParams,
        wrapped: WrappedAsset,
        underlying: Option<Arc<dyn UnderlyingAsset>>,
        relay: Arc<dyn Relay>,
        authority: Box<dyn Authority>,
    ) -> Result<Self, BridgeError> {
        if params.fee_rate_bps > FEE_DENOMINATOR_BPS {
            return Err(BridgeError::InvalidFeeRate {
                bps: params.fee_rate_bps,
                denominator: FEE_DENOMINATOR_BPS,
            });
        }
        Ok(Self {
            ledger_id: params.ledger_id,
            address: params.address,
            operator: params.operator,
            wrapped,
            underlying,
            peers: PeerRegistry::new(),
            inbound: InboundNonces::default(),
            native: HashMap::new(),
            relay,
            vault: None,
            authority,
            forwarder: ForwarderState::default(),
            failed_messages: BTreeMap::new(),
            events: Vec::new(),
        })
    }

    /// Wires the vault service this instance forwards deposits to.
    pub fn with_vault(mut self, vault: Arc<dyn VaultService>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn ledger_id(&self) -> LedgerId {
        self.ledger_id
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn operator(&self) -> Address {
        self.operator
    }

    pub fn is_origin(&self) -> bool {
        self.wrapped.is_origin_ledger
    }

    pub fn wrapped(&self) -> &WrappedAsset {
        &self.wrapped
    }

    pub fn failed_messages(&self) -> impl Iterator<Item = &FailedMessage> {
        self.failed_messages.values()
    }

    // -----------------------------------------------------------------------
    // Event log
    // -----------------------------------------------------------------------

    pub(crate) fn emit(&mut self, event: BridgeEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[BridgeEvent] {
        &self.events
    }

    /// Takes every event recorded so far.
    pub fn drain_events(&mut self) -> Vec<BridgeEvent> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------------
    // Native gas balances
    // -----------------------------------------------------------------------

    /// Credits native currency to `account`, as an external deposit would.
    pub fn fund_native(&mut self, account: &Address, amount: Amount) {
        self.credit_native(account, amount);
    }

    pub fn native_balance_of(&self, account: &Address) -> Amount {
        self.native.get(account).copied().unwrap_or(0)
    }

    pub(crate) fn credit_native(&mut self, account: &Address, amount: Amount) {
        if amount == 0 {
            return;
        }
        let balance = self.native.entry(*account).or_insert(0);
        *balance = balance.saturating_add(amount);
        debug!(ledger = self.ledger_id, account = %account, amount, "native credited");
    }

    pub(crate) fn ensure_native(&self, account: &Address, amount: Amount) -> Result<(), BridgeError> {
        let available = self.native_balance_of(account);
        if available < amount {
            return Err(BridgeError::InsufficientNativeBalance {
                account: *account,
                available,
                requested: amount,
            });
        }
        Ok(())
    }

    pub(crate) fn debit_native(&mut self, account: &Address, amount: Amount) -> Result<(), BridgeError> {
        self.ensure_native(account, amount)?;
        if let Some(balance) = self.native.get_mut(account) {
            *balance -= amount;
            if *balance == 0 {
                self.native.remove(account);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Guards
    // -----------------------------------------------------------------------

    /// The custodied underlying asset, or `WrongLedgerKind` on a peer.
    pub(crate) fn custody(&self) -> Result<Arc<dyn UnderlyingAsset>, BridgeError> {
        match (&self.underlying, self.wrapped.is_origin_ledger) {
            (Some(asset), true) => Ok(Arc::clone(asset)),
            _ => Err(BridgeError::WrongLedgerKind {
                ledger_id: self.ledger_id,
            }),
        }
    }

    pub(crate) fn authorize(&self, caller: &Address) -> Result<(), BridgeError> {
        if self.authority.authorize(caller) {
            Ok(())
        } else {
            Err(BridgeError::Unauthorized(*caller))
        }
    }

    pub(crate) fn trusted_peer(&self, dest_ledger_id: LedgerId) -> Result<Peer, BridgeError> {
        self.peers
            .get(dest_ledger_id)
            .copied()
            .ok_or(BridgeError::UntrustedDestination(dest_ledger_id))
    }

    // -----------------------------------------------------------------------
    // Read-only views
    // -----------------------------------------------------------------------

    /// Aggregate view used by the node's HTTP API.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            ledger_id: self.ledger_id,
            address: self.address,
            is_origin: self.wrapped.is_origin_ledger,
            origin_ledger_id: self.wrapped.origin_ledger_id,
            decimals: self.wrapped.decimals,
            total_wrapped_supply: self.wrapped.total_wrapped_supply,
            holders: self.wrapped.holders(),
            total_accrued_fees: self.wrapped.total_accrued_fees,
            fee_rate_bps: self.wrapped.fee_rate_bps,
            fee_denominator_bps: self.wrapped.fee_denominator_bps,
            custody_balance: self.custody_balance(),
            peers: self.peers.iter().copied().collect(),
            stranded: self.forwarder.stranded_count(),
            failed_messages: self.failed_messages.len(),
            events: self.events.len(),
        }
    }

    pub fn account(&self, account: &Address) -> AccountSnapshot {
        AccountSnapshot {
            address: *account,
            wrapped_balance: self.wrapped.balance_of(account),
            native_balance: self.native_balance_of(account),
        }
    }
}

/// Serializable summary of a ledger instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub ledger_id: LedgerId,
    pub address: Address,
    pub is_origin: bool,
    pub origin_ledger_id: LedgerId,
    pub decimals: u8,
    pub total_wrapped_supply: Amount,
    /// Accounts with a non-zero wrapped balance.
    pub holders: usize,
    pub total_accrued_fees: Amount,
    pub fee_rate_bps: u64,
    pub fee_denominator_bps: u64,
    /// Underlying held in custody; `None` on peers.
    pub custody_balance: Option<Amount>,
    pub peers: Vec<Peer>,
    pub stranded: usize,
    pub failed_messages: usize,
    pub events: usize,
}

/// Balances of one account on one ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub address: Address,
    pub wrapped_balance: Amount,
    pub native_balance: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee_governor::ExecutorAuthority;
    use omniwrap_protocol::config::RelayFeeSchedule;
    use omniwrap_protocol::{InMemoryAsset, InMemoryRelay};

    fn relay() -> Arc<InMemoryRelay> {
        Arc::new(InMemoryRelay::new(RelayFeeSchedule::default()))
    }

    fn params() -> LedgerParams {
        LedgerParams::new(1, Address::derive("bridge"), Address::derive("operator"))
    }

    #[test]
    fn origin_takes_underlying_decimals() {
        let asset = Arc::new(InMemoryAsset::new("TKN", 6));
        let ledger = BridgeLedger::origin(
            params(),
            asset,
            relay(),
            Box::new(ExecutorAuthority::new(Address::derive("exec"))),
        )
        .unwrap();
        assert!(ledger.is_origin());
        assert_eq!(ledger.wrapped().decimals, 6);
        assert_eq!(ledger.snapshot().custody_balance, Some(0));
    }

    #[test]
    fn excessive_initial_fee_rate_rejected() {
        let err = BridgeLedger::peer(
            params().with_fee_rate(FEE_DENOMINATOR_BPS + 1),
            1,
            relay(),
            Box::new(ExecutorAuthority::new(Address::derive("exec"))),
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidFeeRate { .. }));
    }

    #[test]
    fn native_balance_bookkeeping() {
        let mut ledger = BridgeLedger::peer(
            params(),
            1,
            relay(),
            Box::new(ExecutorAuthority::new(Address::derive("exec"))),
        )
        .unwrap();
        let alice = Address::derive("alice");

        ledger.fund_native(&alice, 100);
        ledger.debit_native(&alice, 40).unwrap();
        assert_eq!(ledger.native_balance_of(&alice), 60);

        let err = ledger.debit_native(&alice, 61).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InsufficientNativeBalance { available: 60, requested: 61, .. }
        ));
        assert_eq!(ledger.native_balance_of(&alice), 60);
        assert_eq!(ledger.snapshot().custody_balance, None);
    }
}
