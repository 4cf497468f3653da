//! # Vault Service Interface
//!
//! The remote custodial vault that bridged units can be parked in. The
//! bridge deposits on a user's behalf (or on its own behalf, when it acts as
//! a strategy holder) and withdraws back out; the vault's internal
//! accounting is its own business.
//!
//! [`InMemoryVault`] keeps one share balance per `(account, asset)` at a
//! 1:1 share price, which is all the bridge's conservation checks need.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{Address, Amount, AssetId};

/// Failures reported by the vault service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    /// The asset id was never registered with the vault.
    #[error("unknown vault asset {0}")]
    UnknownAsset(AssetId),

    /// The account's position is smaller than the requested withdrawal.
    #[error("insufficient vault balance for {account} in asset {asset_id}: holds {balance}, requested {requested}")]
    InsufficientShares {
        /// Position owner.
        account: Address,
        /// Asset id of the position.
        asset_id: AssetId,
        /// Current position.
        balance: Amount,
        /// Requested withdrawal.
        requested: Amount,
    },

    /// Zero-amount deposits and withdrawals are refused.
    #[error("zero amount")]
    ZeroAmount,

    /// The vault is not accepting operations.
    #[error("vault paused")]
    Paused,

    /// A position would overflow.
    #[error("vault position overflow")]
    Overflow,
}

/// The operations the bridge needs from the vault service.
pub trait VaultService: Send + Sync {
    /// The vault's own account on the wrapped ledger. Deposited wrapped
    /// units are moved here.
    fn address(&self) -> Address;

    /// Credits `amount` of `asset_id` to `account`'s position.
    fn deposit_on_behalf(
        &self,
        account: &Address,
        asset_id: AssetId,
        amount: Amount,
    ) -> Result<(), VaultError>;

    /// Debits `amount` of `asset_id` from `account`'s position and returns
    /// the amount released.
    fn withdraw(
        &self,
        account: &Address,
        asset_id: AssetId,
        amount: Amount,
    ) -> Result<Amount, VaultError>;

    /// Current position of `account` in `asset_id`.
    fn balance_of(&self, account: &Address, asset_id: AssetId) -> Amount;
}

// ---------------------------------------------------------------------------
// InMemoryVault
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct VaultState {
    assets: HashSet<AssetId>,
    positions: HashMap<(Address, AssetId), Amount>,
    paused: bool,
}

/// Share-per-account vault kept in memory.
#[derive(Debug)]
pub struct InMemoryVault {
    address: Address,
    state: RwLock<VaultState>,
}

impl InMemoryVault {
    /// Creates an empty vault living at `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            state: RwLock::new(VaultState::default()),
        }
    }

    /// Registers an asset id so deposits into it are accepted.
    pub fn add_asset(&self, asset_id: AssetId) {
        self.state.write().assets.insert(asset_id);
        info!(vault = %self.address, asset_id, "vault asset registered");
    }

    /// Pauses or resumes the vault. A paused vault rejects every operation.
    pub fn set_paused(&self, paused: bool) {
        self.state.write().paused = paused;
    }

    /// Sum of all positions in `asset_id`.
    pub fn total_deposits(&self, asset_id: AssetId) -> Amount {
        self.state
            .read()
            .positions
            .iter()
            .filter(|((_, id), _)| *id == asset_id)
            .map(|(_, amount)| *amount)
            .sum()
    }
}

impl VaultService for InMemoryVault {
    fn address(&self) -> Address {
        self.address
    }

    fn deposit_on_behalf(
        &self,
        account: &Address,
        asset_id: AssetId,
        amount: Amount,
    ) -> Result<(), VaultError> {
        let mut state = self.state.write();
        if state.paused {
            return Err(VaultError::Paused);
        }
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        if !state.assets.contains(&asset_id) {
            return Err(VaultError::UnknownAsset(asset_id));
        }

        let position = state.positions.entry((*account, asset_id)).or_insert(0);
        *position = position.checked_add(amount).ok_or(VaultError::Overflow)?;
        debug!(account = %account, asset_id, amount, "vault deposit");
        Ok(())
    }

    fn withdraw(
        &self,
        account: &Address,
        asset_id: AssetId,
        amount: Amount,
    ) -> Result<Amount, VaultError> {
        let mut state = self.state.write();
        if state.paused {
            return Err(VaultError::Paused);
        }
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        if !state.assets.contains(&asset_id) {
            return Err(VaultError::UnknownAsset(asset_id));
        }

        let balance = state
            .positions
            .get(&(*account, asset_id))
            .copied()
            .unwrap_or(0);
        if balance < amount {
            return Err(VaultError::InsufficientShares {
                account: *account,
                asset_id,
                balance,
                requested: amount,
            });
        }

        if balance == amount {
            state.positions.remove(&(*account, asset_id));
        } else {
            state.positions.insert((*account, asset_id), balance - amount);
        }
        debug!(account = %account, asset_id, amount, "vault withdrawal");
        Ok(amount)
    }

    fn balance_of(&self, account: &Address, asset_id: AssetId) -> Amount {
        self.state
            .read()
            .positions
            .get(&(*account, asset_id))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> InMemoryVault {
        let vault = InMemoryVault::new(Address::derive("vault"));
        vault.add_asset(1);
        vault
    }

    #[test]
    fn deposit_then_withdraw_round_trips() {
        let vault = vault();
        let alice = Address::derive("alice");
        vault.deposit_on_behalf(&alice, 1, 500).unwrap();
        assert_eq!(vault.balance_of(&alice, 1), 500);
        assert_eq!(vault.withdraw(&alice, 1, 500).unwrap(), 500);
        assert_eq!(vault.balance_of(&alice, 1), 0);
        assert_eq!(vault.total_deposits(1), 0);
    }

    #[test]
    fn unknown_asset_rejected() {
        let vault = vault();
        let err = vault
            .deposit_on_behalf(&Address::derive("alice"), 9, 10)
            .unwrap_err();
        assert_eq!(err, VaultError::UnknownAsset(9));
    }

    #[test]
    fn over_withdrawal_rejected() {
        let vault = vault();
        let alice = Address::derive("alice");
        vault.deposit_on_behalf(&alice, 1, 5).unwrap();
        assert!(matches!(
            vault.withdraw(&alice, 1, 6),
            Err(VaultError::InsufficientShares { balance: 5, .. })
        ));
        assert_eq!(vault.balance_of(&alice, 1), 5);
    }

    #[test]
    fn positions_are_per_account() {
        let vault = vault();
        let alice = Address::derive("alice");
        let bob = Address::derive("bob");
        vault.deposit_on_behalf(&alice, 1, 5).unwrap();
        vault.deposit_on_behalf(&bob, 1, 7).unwrap();
        assert_eq!(vault.total_deposits(1), 12);
        assert!(vault.withdraw(&bob, 1, 8).is_err());
    }

    #[test]
    fn paused_vault_rejects_everything() {
        let vault = vault();
        let alice = Address::derive("alice");
        vault.set_paused(true);
        assert_eq!(
            vault.deposit_on_behalf(&alice, 1, 5),
            Err(VaultError::Paused)
        );
        vault.set_paused(false);
        vault.deposit_on_behalf(&alice, 1, 5).unwrap();
    }

    #[test]
    fn zero_amount_rejected() {
        let vault = vault();
        assert_eq!(
            vault.deposit_on_behalf(&Address::derive("alice"), 1, 0),
            Err(VaultError::ZeroAmount)
        );
    }
}
