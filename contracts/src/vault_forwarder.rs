//! # Vault Forwarder
//!
//! Moves wrapped units into and out of a vault service that lives on a
//! remote ledger, on behalf of a caller on this one.
//!
//! ```text
//!  source ledger                          vault ledger
//!  send_to_vault ── burn, VaultDeposit ──► mint to holding
//!                                          vault.deposit_on_behalf(account)
//!                                          holding ──► vault account
//!
//!  retrieve_from_vault ── VaultWithdraw ─► vault.withdraw(account)
//!                        (airdrop)         vault account ──► holding
//!                                          burn, Transfer ──┐
//!  mint to owner ◄──────────────────────────────────────────┘
//! ```
//!
//! `account` is the owner itself, or the vault ledger's bridge instance
//! when the strategy path is requested; strategy positions are tracked per
//! owner so one owner cannot withdraw another's.
//!
//! A destination-side failure never destroys units. Whatever was credited
//! stays in the holding account under a [`StrandedFunds`] record until the
//! executor calls `recover_stranded`.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use omniwrap_protocol::{
    AdapterParams, Address, Amount, AssetId, BridgePayload, DispatchOptions, DispatchReceipt,
    LedgerId,
};

use crate::bridge::ReceiveOutcome;
use crate::error::BridgeError;
use crate::events::BridgeEvent;
use crate::ledger::BridgeLedger;

/// Wrapped units parked in the holding account after a failed vault step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrandedFunds {
    pub id: Uuid,
    /// Who the units belong to.
    pub owner: Address,
    /// Ledger the units are returned to on recovery.
    pub return_ledger_id: LedgerId,
    pub amount: Amount,
    pub asset_id: AssetId,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Parameters shared by `send_to_vault` and `retrieve_from_vault`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRequest {
    pub amount: Amount,
    pub asset_id: AssetId,
    /// Ledger hosting the vault.
    pub dest_ledger_id: LedgerId,
    /// Hold the position under the remote bridge instance's own account.
    pub use_strategy: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ForwarderState {
    stranded: BTreeMap<Uuid, StrandedFunds>,
    positions: HashMap<(Address, AssetId), Amount>,
}

impl ForwarderState {
    pub(crate) fn stranded_count(&self) -> usize {
        self.stranded.len()
    }

    fn position(&self, owner: &Address, asset_id: AssetId) -> Amount {
        self.positions.get(&(*owner, asset_id)).copied().unwrap_or(0)
    }

    fn add_position(&mut self, owner: &Address, asset_id: AssetId, amount: Amount) {
        let position = self.positions.entry((*owner, asset_id)).or_insert(0);
        *position = position.saturating_add(amount);
    }

    fn sub_position(&mut self, owner: &Address, asset_id: AssetId, amount: Amount) {
        if let Some(position) = self.positions.get_mut(&(*owner, asset_id)) {
            *position = position.saturating_sub(amount);
            if *position == 0 {
                self.positions.remove(&(*owner, asset_id));
            }
        }
    }
}

impl BridgeLedger {
    // -----------------------------------------------------------------------
    // Source side
    // -----------------------------------------------------------------------

    /// Burns `request.amount` from `caller` and asks the peer on
    /// `request.dest_ledger_id` to deposit it into its vault. `gas_limit`
    /// is requested for destination execution.
    pub fn send_to_vault(
        &mut self,
        caller: &Address,
        request: VaultRequest,
        gas_limit: u64,
        refund_address: Address,
        value: Amount,
    ) -> Result<DispatchReceipt, BridgeError> {
        if request.amount == 0 {
            return Err(BridgeError::ZeroAmount);
        }
        let peer = self.trusted_peer(request.dest_ledger_id)?;
        let payload = BridgePayload::VaultDeposit {
            recipient: *caller,
            amount: request.amount,
            asset_id: request.asset_id,
            use_strategy: request.use_strategy,
        };
        let options = DispatchOptions::refund_to(refund_address)
            .with_adapter_params(AdapterParams::Gas { gas_limit });
        self.debit_and_dispatch(caller, caller, &peer, request.amount, &payload, options, value)
    }

    /// Asks the peer on `request.dest_ledger_id` to withdraw from its vault
    /// and send the units back to `caller` here. `adapter_params` should
    /// airdrop enough native currency to the remote instance to pay the
    /// return trip.
    pub fn retrieve_from_vault(
        &mut self,
        caller: &Address,
        request: VaultRequest,
        zro_payment_address: Address,
        adapter_params: Vec<u8>,
        value: Amount,
    ) -> Result<DispatchReceipt, BridgeError> {
        if request.amount == 0 {
            return Err(BridgeError::ZeroAmount);
        }
        let peer = self.trusted_peer(request.dest_ledger_id)?;
        let payload = BridgePayload::VaultWithdraw {
            owner: *caller,
            amount: request.amount,
            asset_id: request.asset_id,
            use_strategy: request.use_strategy,
        };
        let options = DispatchOptions {
            refund_address: *caller,
            zro_payment_address,
            adapter_params,
        };
        self.dispatch_message(caller, &peer, &payload, options, value)
    }

    // -----------------------------------------------------------------------
    // Vault side
    // -----------------------------------------------------------------------

    pub(crate) fn on_vault_deposit(
        &mut self,
        source_ledger_id: LedgerId,
        recipient: &Address,
        amount: Amount,
        asset_id: AssetId,
        use_strategy: bool,
    ) -> ReceiveOutcome {
        let holding = self.address;
        if let Err(err) = self.wrapped.mint(&holding, amount) {
            return ReceiveOutcome::Failed(err);
        }

        let Some(vault) = self.vault.clone() else {
            let err = BridgeError::VaultUnavailable(self.ledger_id);
            return self.strand(recipient, source_ledger_id, amount, asset_id, err);
        };

        let account = if use_strategy { holding } else { *recipient };
        if let Err(err) = vault.deposit_on_behalf(&account, asset_id, amount) {
            return self.strand(recipient, source_ledger_id, amount, asset_id, err.into());
        }
        if let Err(err) = self.wrapped.move_units(&holding, &vault.address(), amount) {
            return ReceiveOutcome::Failed(err);
        }
        if use_strategy {
            self.forwarder.add_position(recipient, asset_id, amount);
        }

        info!(
            ledger = self.ledger_id,
            owner = %recipient,
            account = %account,
            asset_id,
            amount,
            strategy = use_strategy,
            "vault deposit"
        );
        self.emit(BridgeEvent::VaultDeposited {
            account,
            asset_id,
            amount,
            strategy: use_strategy,
        });
        ReceiveOutcome::VaultDeposited {
            account,
            asset_id,
            amount,
        }
    }

    pub(crate) fn on_vault_withdraw(
        &mut self,
        source_ledger_id: LedgerId,
        owner: &Address,
        amount: Amount,
        asset_id: AssetId,
        use_strategy: bool,
    ) -> ReceiveOutcome {
        let Some(vault) = self.vault.clone() else {
            return self.vault_failure(BridgeError::VaultUnavailable(self.ledger_id));
        };

        let holding = self.address;
        let account = if use_strategy {
            let available = self.forwarder.position(owner, asset_id);
            if available < amount {
                return self.vault_failure(BridgeError::InsufficientStrategyPosition {
                    owner: *owner,
                    asset_id,
                    available,
                    requested: amount,
                });
            }
            holding
        } else {
            *owner
        };

        let released = match vault.withdraw(&account, asset_id, amount) {
            Ok(released) => released,
            Err(err) => return self.vault_failure(err.into()),
        };
        if let Err(err) = self.wrapped.move_units(&vault.address(), &holding, released) {
            return self.vault_failure(err);
        }
        if use_strategy {
            self.forwarder.sub_position(owner, asset_id, amount);
        }

        info!(
            ledger = self.ledger_id,
            owner = %owner,
            account = %account,
            asset_id,
            amount = released,
            strategy = use_strategy,
            "vault withdrawal"
        );
        self.emit(BridgeEvent::VaultWithdrawn {
            account,
            asset_id,
            amount: released,
            strategy: use_strategy,
        });

        match self.return_to_owner(owner, source_ledger_id, released) {
            Ok(receipt) => ReceiveOutcome::VaultWithdrawn {
                owner: *owner,
                amount: released,
                return_nonce: receipt.nonce,
            },
            Err(err) => self.strand(owner, source_ledger_id, released, asset_id, err),
        }
    }

    /// Sends `amount` from the holding account back to `owner`, paying the
    /// exact quote from this instance's own native balance.
    fn return_to_owner(
        &mut self,
        owner: &Address,
        dest_ledger_id: LedgerId,
        amount: Amount,
    ) -> Result<DispatchReceipt, BridgeError> {
        let holding = self.address;
        let peer = self.trusted_peer(dest_ledger_id)?;
        let payload = BridgePayload::Transfer {
            recipient: *owner,
            amount,
        };
        let options = DispatchOptions::refund_to(holding);
        let fee = self.quote(dest_ledger_id, &payload, &options)?;
        self.debit_and_dispatch(&holding, &holding, &peer, amount, &payload, options, fee)
    }

    fn strand(
        &mut self,
        owner: &Address,
        return_ledger_id: LedgerId,
        amount: Amount,
        asset_id: AssetId,
        err: BridgeError,
    ) -> ReceiveOutcome {
        let record = StrandedFunds {
            id: Uuid::new_v4(),
            owner: *owner,
            return_ledger_id,
            amount,
            asset_id,
            reason: err.to_string(),
            recorded_at: Utc::now(),
        };
        warn!(
            ledger = self.ledger_id,
            id = %record.id,
            owner = %owner,
            amount,
            reason = %record.reason,
            "units stranded in holding account"
        );
        self.emit(BridgeEvent::VaultOperationFailed {
            stranded_id: Some(record.id),
            reason: record.reason.clone(),
        });
        self.forwarder.stranded.insert(record.id, record);
        ReceiveOutcome::Failed(err)
    }

    fn vault_failure(&mut self, err: BridgeError) -> ReceiveOutcome {
        warn!(ledger = self.ledger_id, error = %err, "vault withdrawal failed");
        self.emit(BridgeEvent::VaultOperationFailed {
            stranded_id: None,
            reason: err.to_string(),
        });
        ReceiveOutcome::Failed(err)
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Returns a stranded record's units to their owner on the record's
    /// return ledger. Executor only; the executor pays with `value`.
    pub fn recover_stranded(
        &mut self,
        caller: &Address,
        id: Uuid,
        value: Amount,
    ) -> Result<DispatchReceipt, BridgeError> {
        self.authorize(caller)?;
        let record = self
            .forwarder
            .stranded
            .get(&id)
            .cloned()
            .ok_or(BridgeError::UnknownStranded(id))?;
        let peer = self.trusted_peer(record.return_ledger_id)?;

        let holding = self.address;
        let payload = BridgePayload::Transfer {
            recipient: record.owner,
            amount: record.amount,
        };
        let options = DispatchOptions::refund_to(*caller);
        let receipt =
            self.debit_and_dispatch(&holding, caller, &peer, record.amount, &payload, options, value)?;
        self.forwarder.stranded.remove(&id);

        info!(
            ledger = self.ledger_id,
            id = %id,
            owner = %record.owner,
            amount = record.amount,
            dest = record.return_ledger_id,
            "stranded units recovered"
        );
        self.emit(BridgeEvent::StrandedRecovered {
            id,
            owner: record.owner,
            amount: record.amount,
            dest_ledger_id: record.return_ledger_id,
        });
        Ok(receipt)
    }

    /// Outstanding stranded records, ordered by id.
    pub fn stranded(&self) -> impl Iterator<Item = &StrandedFunds> {
        self.forwarder.stranded.values()
    }

    /// Amount held under this instance's vault account for `owner`.
    pub fn strategy_position(&self, owner: &Address, asset_id: AssetId) -> Amount {
        self.forwarder.position(owner, asset_id)
    }
}
