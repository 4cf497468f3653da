//! # Wrapped Asset Ledger
//!
//! Mints and burns the wrapped representation. On the origin ledger every
//! minted unit is backed by underlying held in custody at the bridge's own
//! address:
//!
//! ```text
//! total_wrapped_supply + total_accrued_fees <= custody balance
//! ```
//!
//! `wrap` pulls `amount` into custody and mints `amount - fee`, so the fee
//! stays in custody until `harvest_fees` pays it out. On peer ledgers supply
//! only changes through cross-ledger credit and debit.
//!
//! All arithmetic is checked. Balances are bounded by the total supply, so
//! once the supply bound holds no individual balance can overflow.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use omniwrap_protocol::config::FEE_DENOMINATOR_BPS;
use omniwrap_protocol::{Address, Amount, LedgerId};

use crate::error::BridgeError;
use crate::events::BridgeEvent;
use crate::ledger::BridgeLedger;

/// `floor(amount * fee_rate_bps / denominator_bps)` with 128-bit
/// intermediate math. A zero denominator yields no fee.
pub fn estimate_fee(fee_rate_bps: u64, denominator_bps: u64, amount: Amount) -> Amount {
    if denominator_bps == 0 {
        return 0;
    }
    let fee = u128::from(amount) * u128::from(fee_rate_bps) / u128::from(denominator_bps);
    Amount::try_from(fee).unwrap_or(Amount::MAX)
}

// ---------------------------------------------------------------------------
// WrappedAsset
// ---------------------------------------------------------------------------

/// Supply and balances of the wrapped representation on one ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedAsset {
    pub origin_ledger_id: LedgerId,
    pub is_origin_ledger: bool,
    pub total_wrapped_supply: Amount,
    pub total_accrued_fees: Amount,
    pub fee_rate_bps: u64,
    pub fee_denominator_bps: u64,
    pub decimals: u8,
    balances: HashMap<Address, Amount>,
}

impl WrappedAsset {
    pub fn new(
        origin_ledger_id: LedgerId,
        is_origin_ledger: bool,
        fee_rate_bps: u64,
        decimals: u8,
    ) -> Self {
        Self {
            origin_ledger_id,
            is_origin_ledger,
            total_wrapped_supply: 0,
            total_accrued_fees: 0,
            fee_rate_bps,
            fee_denominator_bps: FEE_DENOMINATOR_BPS,
            decimals,
            balances: HashMap::new(),
        }
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Fee `wrap` would charge on `amount` at the current rate.
    pub fn estimate_fee(&self, amount: Amount) -> Amount {
        estimate_fee(self.fee_rate_bps, self.fee_denominator_bps, amount)
    }

    /// Number of accounts with a non-zero balance.
    pub fn holders(&self) -> usize {
        self.balances.len()
    }

    pub(crate) fn ensure_mintable(&self, amount: Amount) -> Result<(), BridgeError> {
        self.total_wrapped_supply
            .checked_add(amount)
            .map(|_| ())
            .ok_or(BridgeError::SupplyOverflow)
    }

    pub(crate) fn mint(&mut self, to: &Address, amount: Amount) -> Result<(), BridgeError> {
        self.ensure_mintable(amount)?;
        if amount == 0 {
            return Ok(());
        }
        self.total_wrapped_supply += amount;
        *self.balances.entry(*to).or_insert(0) += amount;
        Ok(())
    }

    pub(crate) fn ensure_burnable(&self, from: &Address, amount: Amount) -> Result<(), BridgeError> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(BridgeError::InsufficientBalance {
                account: *from,
                available,
                requested: amount,
            });
        }
        Ok(())
    }

    pub(crate) fn burn(&mut self, from: &Address, amount: Amount) -> Result<(), BridgeError> {
        self.debit(from, amount)?;
        self.total_wrapped_supply -= amount;
        Ok(())
    }

    /// Moves units between accounts; supply unchanged.
    pub(crate) fn move_units(
        &mut self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), BridgeError> {
        self.debit(from, amount)?;
        if amount > 0 {
            *self.balances.entry(*to).or_insert(0) += amount;
        }
        Ok(())
    }

    fn debit(&mut self, from: &Address, amount: Amount) -> Result<(), BridgeError> {
        self.ensure_burnable(from, amount)?;
        if let Some(balance) = self.balances.get_mut(from) {
            *balance -= amount;
            if *balance == 0 {
                self.balances.remove(from);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ledger operations
// ---------------------------------------------------------------------------

impl BridgeLedger {
    /// Locks `amount` of underlying from `caller` and mints `amount - fee`
    /// wrapped units to `recipient`. Returns the minted amount.
    ///
    /// The caller must have approved the bridge address for the full
    /// `amount` on the underlying asset.
    pub fn wrap(
        &mut self,
        caller: &Address,
        recipient: &Address,
        amount: Amount,
    ) -> Result<Amount, BridgeError> {
        let underlying = self.custody()?;
        if amount == 0 {
            return Err(BridgeError::ZeroAmount);
        }

        let fee = self.wrapped.estimate_fee(amount);
        let minted = amount.saturating_sub(fee);
        let fees_after = self
            .wrapped
            .total_accrued_fees
            .checked_add(fee)
            .ok_or(BridgeError::SupplyOverflow)?;
        self.wrapped.ensure_mintable(minted)?;

        underlying.transfer_from(&self.address, caller, &self.address, amount)?;

        self.wrapped.mint(recipient, minted)?;
        self.wrapped.total_accrued_fees = fees_after;

        info!(
            ledger = self.ledger_id,
            caller = %caller,
            recipient = %recipient,
            amount,
            fee,
            "wrapped"
        );
        self.emit(BridgeEvent::Wrapped {
            recipient: *recipient,
            amount: minted,
            fee,
        });
        Ok(minted)
    }

    /// Burns `amount` wrapped units held by `caller` and releases the same
    /// amount of underlying to `recipient`. No fee.
    pub fn unwrap(
        &mut self,
        caller: &Address,
        recipient: &Address,
        amount: Amount,
    ) -> Result<(), BridgeError> {
        let underlying = self.custody()?;
        if amount == 0 {
            return Err(BridgeError::ZeroAmount);
        }
        self.wrapped.ensure_burnable(caller, amount)?;

        underlying.transfer(&self.address, recipient, amount)?;
        self.wrapped.burn(caller, amount)?;

        info!(
            ledger = self.ledger_id,
            caller = %caller,
            recipient = %recipient,
            amount,
            "unwrapped"
        );
        self.emit(BridgeEvent::Unwrapped {
            recipient: *recipient,
            amount,
        });
        Ok(())
    }

    /// Pays every accrued fee to the operator. Anyone may trigger it.
    /// Returns the amount paid; zero means nothing happened.
    pub fn harvest_fees(&mut self) -> Result<Amount, BridgeError> {
        let underlying = self.custody()?;
        let amount = self.wrapped.total_accrued_fees;
        if amount == 0 {
            debug!(ledger = self.ledger_id, "harvest skipped, no accrued fees");
            return Ok(0);
        }

        underlying.transfer(&self.address, &self.operator, amount)?;
        self.wrapped.total_accrued_fees = 0;

        info!(
            ledger = self.ledger_id,
            operator = %self.operator,
            amount,
            "fees harvested"
        );
        self.emit(BridgeEvent::FeesHarvested { amount });
        Ok(amount)
    }

    /// Moves wrapped units between two accounts on this ledger.
    pub fn transfer(
        &mut self,
        caller: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), BridgeError> {
        if amount == 0 {
            return Err(BridgeError::ZeroAmount);
        }
        self.wrapped.move_units(caller, to, amount)?;
        debug!(ledger = self.ledger_id, from = %caller, to = %to, amount, "wrapped transfer");
        Ok(())
    }

    /// Fee a `wrap` of `amount` would charge right now.
    pub fn estimate_fee(&self, amount: Amount) -> Amount {
        self.wrapped.estimate_fee(amount)
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.wrapped.balance_of(account)
    }

    pub fn total_supply(&self) -> Amount {
        self.wrapped.total_wrapped_supply
    }

    pub fn accrued_fees(&self) -> Amount {
        self.wrapped.total_accrued_fees
    }

    pub fn decimals(&self) -> u8 {
        self.wrapped.decimals
    }

    /// Underlying held in custody; `None` on peer ledgers.
    pub fn custody_balance(&self) -> Option<Amount> {
        self.custody().ok().map(|asset| asset.balance_of(&self.address))
    }
}
