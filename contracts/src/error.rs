//! Error taxonomy shared by every bridge entry point.
//!
//! Every variant aborts the operation that raised it and leaves the ledger
//! exactly as it was. The only exceptions are the post-admission failures
//! a `receive` reports through [`crate::ReceiveOutcome::Failed`]: there the
//! nonce is consumed and, for vault failures, the credited units stay in
//! the holding account as a stranded record.

use thiserror::Error;
use uuid::Uuid;

use omniwrap_protocol::{
    Address, Amount, AssetError, AssetId, CodecError, LedgerId, RelayError, VaultError,
};

/// Errors raised by [`crate::BridgeLedger`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// wrap / unwrap / harvest on a ledger that does not hold custody.
    #[error("ledger {ledger_id} is not the origin ledger")]
    WrongLedgerKind {
        /// The ledger that rejected the call.
        ledger_id: LedgerId,
    },

    /// Zero-amount wraps, unwraps, sends and vault operations are refused.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// The account holds fewer wrapped units than requested.
    #[error("insufficient wrapped balance: {account} holds {available}, requested {requested}")]
    InsufficientBalance {
        /// Account being debited.
        account: Address,
        /// Its wrapped balance.
        available: Amount,
        /// Amount requested.
        requested: Amount,
    },

    /// Failure from the underlying asset (allowance or balance), unchanged.
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// No peer is registered for the destination ledger.
    #[error("destination ledger {0} is not a trusted peer")]
    UntrustedDestination(LedgerId),

    /// The `(ledger, sender)` pair of an inbound message is not registered.
    #[error("untrusted source {sender} on ledger {ledger_id}")]
    UntrustedSource {
        /// Claimed source ledger.
        ledger_id: LedgerId,
        /// Claimed sender address.
        sender: Address,
    },

    /// The nonce was already consumed on this path.
    #[error("replayed message from ledger {ledger_id}: nonce {nonce}, last consumed {last}")]
    ReplayedMessage {
        /// Source ledger.
        ledger_id: LedgerId,
        /// Presented nonce.
        nonce: u64,
        /// Last consumed nonce.
        last: u64,
    },

    /// The nonce skips ahead of the next expected one.
    #[error("unexpected nonce from ledger {ledger_id}: expected {expected}, got {got}")]
    UnexpectedNonce {
        /// Source ledger.
        ledger_id: LedgerId,
        /// Next nonce this ledger will accept.
        expected: u64,
        /// Presented nonce.
        got: u64,
    },

    /// The payload could not be decoded.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] CodecError),

    /// The vault service rejected a deposit or withdrawal.
    #[error("vault operation failed: {0}")]
    VaultOperationFailed(#[from] VaultError),

    /// No vault service is wired to this ledger.
    #[error("no vault service configured on ledger {0}")]
    VaultUnavailable(LedgerId),

    /// A strategy withdrawal exceeds what the owner deposited.
    #[error("strategy position of {owner} in asset {asset_id} is {available}, requested {requested}")]
    InsufficientStrategyPosition {
        /// Owner of the position.
        owner: Address,
        /// Vault asset.
        asset_id: AssetId,
        /// Position held for the owner.
        available: Amount,
        /// Amount requested.
        requested: Amount,
    },

    /// The caller is not the privileged executor.
    #[error("caller {0} is not authorized")]
    Unauthorized(Address),

    /// Fee rate above the denominator.
    #[error("fee rate {bps} bps exceeds denominator {denominator} bps")]
    InvalidFeeRate {
        /// Requested rate.
        bps: u64,
        /// Denominator in force.
        denominator: u64,
    },

    /// The payer cannot cover the native value it attached.
    #[error("insufficient native balance: {account} holds {available}, requested {requested}")]
    InsufficientNativeBalance {
        /// Account paying for the dispatch.
        account: Address,
        /// Its native balance.
        available: Amount,
        /// Value attached.
        requested: Amount,
    },

    /// The relay refused the dispatch.
    #[error("relay rejected dispatch: {0}")]
    Relay(#[from] RelayError),

    /// Minting would overflow the wrapped supply or the fee accumulator.
    #[error("wrapped supply overflow")]
    SupplyOverflow,

    /// A packet addressed to another ledger instance.
    #[error("packet for ledger {ledger_id} at {address} delivered to the wrong instance")]
    MisroutedPacket {
        /// Ledger the packet targets.
        ledger_id: LedgerId,
        /// Instance address the packet targets.
        address: Address,
    },

    /// No stranded-funds record with this id.
    #[error("unknown stranded record {0}")]
    UnknownStranded(Uuid),
}

impl BridgeError {
    /// Whether a refused inbound packet may be admitted later, once trust
    /// is set, an earlier nonce lands, or supply frees up. A relay keeps
    /// such packets for redelivery instead of dropping them.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::UntrustedSource { .. }
                | BridgeError::UnexpectedNonce { .. }
                | BridgeError::SupplyOverflow
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_refusals_are_retryable() {
        let sender = Address::derive("peer");
        assert!(BridgeError::UntrustedSource { ledger_id: 1, sender }.is_retryable());
        assert!(BridgeError::UnexpectedNonce {
            ledger_id: 1,
            expected: 1,
            got: 3
        }
        .is_retryable());
        assert!(BridgeError::SupplyOverflow.is_retryable());

        assert!(!BridgeError::ReplayedMessage {
            ledger_id: 1,
            nonce: 1,
            last: 1
        }
        .is_retryable());
        assert!(!BridgeError::MisroutedPacket {
            ledger_id: 1,
            address: sender
        }
        .is_retryable());
    }
}
