//! Observable ledger events.
//!
//! Each [`crate::BridgeLedger`] appends to an in-memory log as operations
//! succeed. Monitoring and tests read it with `events()` or consume it
//! with `drain_events()`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use omniwrap_protocol::{Address, Amount, AssetId, LedgerId, MessageKind};

/// Something that happened on a ledger instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Underlying locked, wrapped units minted net of `fee`.
    Wrapped {
        recipient: Address,
        amount: Amount,
        fee: Amount,
    },
    /// Wrapped units burned, underlying released.
    Unwrapped { recipient: Address, amount: Amount },
    /// Accrued fees paid to the operator.
    FeesHarvested { amount: Amount },
    /// A message left this ledger.
    MessageSent {
        dest_ledger_id: LedgerId,
        nonce: u64,
        kind: MessageKind,
    },
    /// A message was admitted and decoded.
    MessageReceived {
        source_ledger_id: LedgerId,
        nonce: u64,
        kind: MessageKind,
    },
    /// An admitted message could not be decoded.
    MessageFailed {
        source_ledger_id: LedgerId,
        nonce: u64,
        reason: String,
    },
    PeerSet {
        remote_ledger_id: LedgerId,
        remote_address: Address,
    },
    PeerRemoved { remote_ledger_id: LedgerId },
    FeeRateUpdated { old_bps: u64, new_bps: u64 },
    /// Units deposited into the vault for `account`.
    VaultDeposited {
        account: Address,
        asset_id: AssetId,
        amount: Amount,
        strategy: bool,
    },
    /// Units withdrawn from the vault for `account`.
    VaultWithdrawn {
        account: Address,
        asset_id: AssetId,
        amount: Amount,
        strategy: bool,
    },
    /// A destination-side vault step failed. `stranded_id` is set when
    /// units were left in the holding account.
    VaultOperationFailed {
        stranded_id: Option<Uuid>,
        reason: String,
    },
    /// Stranded units were sent back to their owner.
    StrandedRecovered {
        id: Uuid,
        owner: Address,
        amount: Amount,
        dest_ledger_id: LedgerId,
    },
}
