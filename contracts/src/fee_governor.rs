//! # Fee Governor
//!
//! The administrative surface of a bridge instance. Privileged operations
//! (peer trust, fee rate, stranded-funds recovery) check the caller through
//! an injected [`Authority`]. The default [`ExecutorAuthority`] admits one
//! address: the executor resolved by an [`AdminGate`].
//!
//! The gate's owner never calls a ledger directly. It hands the gate an
//! [`AdminCall`] and the gate applies it as the executor, optionally
//! swallowing a failure.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use omniwrap_protocol::{Address, Amount, CodecError, DispatchReceipt, LedgerId};

use crate::error::BridgeError;
use crate::events::BridgeEvent;
use crate::ledger::BridgeLedger;

// ---------------------------------------------------------------------------
// Authority
// ---------------------------------------------------------------------------

/// Decides whether a caller may run privileged operations.
pub trait Authority: Send + Sync {
    fn authorize(&self, caller: &Address) -> bool;
}

/// Admits exactly one executor address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorAuthority {
    executor: Address,
}

impl ExecutorAuthority {
    pub fn new(executor: Address) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> Address {
        self.executor
    }
}

impl Authority for ExecutorAuthority {
    fn authorize(&self, caller: &Address) -> bool {
        *caller == self.executor
    }
}

// ---------------------------------------------------------------------------
// Admin calls
// ---------------------------------------------------------------------------

/// A privileged operation the gate can apply to a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminCall {
    SetPeer {
        remote_ledger_id: LedgerId,
        remote_address: Address,
    },
    RemovePeer {
        remote_ledger_id: LedgerId,
    },
    SetFeeRate {
        fee_rate_bps: u64,
    },
    /// `value` is native currency the executor attaches for the return
    /// dispatch.
    RecoverStranded {
        id: Uuid,
        value: Amount,
    },
}

impl AdminCall {
    /// Encodes the call for transport to the gate.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Empty);
        }
        bincode::deserialize(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            AdminCall::SetPeer { .. } => "set_peer",
            AdminCall::RemovePeer { .. } => "remove_peer",
            AdminCall::SetFeeRate { .. } => "set_fee_rate",
            AdminCall::RecoverStranded { .. } => "recover_stranded",
        }
    }
}

/// What applying an [`AdminCall`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminOutcome {
    Applied,
    /// The call dispatched a message.
    Dispatched(DispatchReceipt),
    /// The call failed and the gate was told to allow failure.
    Failed(BridgeError),
}

// ---------------------------------------------------------------------------
// AdminGate
// ---------------------------------------------------------------------------

/// Owner-facing gate that executes [`AdminCall`]s as its executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminGate {
    owner: Address,
    executor: Address,
}

impl AdminGate {
    /// Creates a gate for `owner` with a derived executor address.
    pub fn new(owner: Address) -> Self {
        let executor = Address::derive(&format!("admin-gate/executor/{}", owner.to_hex()));
        Self { owner, executor }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn executor(&self) -> Address {
        self.executor
    }

    /// The authority ledgers governed by this gate should be deployed with.
    pub fn authority(&self) -> Box<ExecutorAuthority> {
        Box::new(ExecutorAuthority::new(self.executor))
    }

    /// Applies `call` to `target` as the executor. Only the owner may call.
    /// With `allow_failure`, a failing call is logged and reported as
    /// [`AdminOutcome::Failed`] instead of an error.
    pub fn execute(
        &self,
        caller: &Address,
        target: &mut BridgeLedger,
        call: AdminCall,
        allow_failure: bool,
    ) -> Result<AdminOutcome, BridgeError> {
        if *caller != self.owner {
            return Err(BridgeError::Unauthorized(*caller));
        }
        let name = call.name();
        match target.apply_admin(&self.executor, call) {
            Ok(outcome) => Ok(outcome),
            Err(err) if allow_failure => {
                warn!(ledger = target.ledger_id(), call = name, error = %err, "admin call failed, continuing");
                Ok(AdminOutcome::Failed(err))
            }
            Err(err) => Err(err),
        }
    }

    /// [`AdminGate::execute`] for an encoded call.
    pub fn execute_encoded(
        &self,
        caller: &Address,
        target: &mut BridgeLedger,
        encoded: &[u8],
        allow_failure: bool,
    ) -> Result<AdminOutcome, BridgeError> {
        let call = AdminCall::decode(encoded)?;
        self.execute(caller, target, call, allow_failure)
    }
}

// ---------------------------------------------------------------------------
// Ledger operations
// ---------------------------------------------------------------------------

impl BridgeLedger {
    /// Changes the wrap fee rate. Takes effect on the next `wrap`.
    pub fn set_fee_rate(&mut self, caller: &Address, fee_rate_bps: u64) -> Result<(), BridgeError> {
        self.authorize(caller)?;
        let denominator = self.wrapped.fee_denominator_bps;
        if fee_rate_bps > denominator {
            return Err(BridgeError::InvalidFeeRate {
                bps: fee_rate_bps,
                denominator,
            });
        }
        let old_bps = std::mem::replace(&mut self.wrapped.fee_rate_bps, fee_rate_bps);
        info!(ledger = self.ledger_id, old_bps, new_bps = fee_rate_bps, "fee rate updated");
        self.emit(BridgeEvent::FeeRateUpdated {
            old_bps,
            new_bps: fee_rate_bps,
        });
        Ok(())
    }

    /// Applies a privileged call on behalf of `caller`.
    pub fn apply_admin(&mut self, caller: &Address, call: AdminCall) -> Result<AdminOutcome, BridgeError> {
        match call {
            AdminCall::SetPeer {
                remote_ledger_id,
                remote_address,
            } => self
                .set_peer(caller, remote_ledger_id, remote_address)
                .map(|()| AdminOutcome::Applied),
            AdminCall::RemovePeer { remote_ledger_id } => self
                .remove_peer(caller, remote_ledger_id)
                .map(|()| AdminOutcome::Applied),
            AdminCall::SetFeeRate { fee_rate_bps } => self
                .set_fee_rate(caller, fee_rate_bps)
                .map(|()| AdminOutcome::Applied),
            AdminCall::RecoverStranded { id, value } => self
                .recover_stranded(caller, id, value)
                .map(AdminOutcome::Dispatched),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_authority_admits_only_executor() {
        let exec = Address::derive("exec");
        let authority = ExecutorAuthority::new(exec);
        assert!(authority.authorize(&exec));
        assert!(!authority.authorize(&Address::derive("mallory")));
    }

    #[test]
    fn gate_executor_is_stable_and_distinct() {
        let owner = Address::derive("owner");
        let gate = AdminGate::new(owner);
        assert_eq!(gate.executor(), AdminGate::new(owner).executor());
        assert_ne!(gate.executor(), owner);
        assert_eq!(gate.authority().executor(), gate.executor());
    }

    #[test]
    fn admin_call_codec() {
        let call = AdminCall::RecoverStranded {
            id: Uuid::new_v4(),
            value: 42,
        };
        let bytes = call.encode().unwrap();
        assert_eq!(AdminCall::decode(&bytes).unwrap(), call);
        assert_eq!(AdminCall::decode(&[]), Err(CodecError::Empty));
        assert!(matches!(
            AdminCall::decode(&[0xff, 0xff, 0xff, 0xff]),
            Err(CodecError::Malformed(_))
        ));
    }
}
