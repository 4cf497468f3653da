//! # Underlying Asset Interface
//!
//! The fungible asset that the origin ledger locks in custody. The bridge
//! only ever talks to it through [`UnderlyingAsset`]; [`InMemoryAsset`] is
//! the allowance-based reference book used by the devnet and the tests.
//!
//! Methods take `&self` and implementations guard their own state, so one
//! asset handle can be shared between the ledger that holds custody and the
//! accounts that fund and approve it.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::types::{Address, Amount};

/// Failures reported by the underlying asset. The bridge propagates these
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    /// The spender has not been approved for enough of the owner's balance.
    #[error("insufficient allowance: {spender} may spend {allowance} of {owner}, requested {requested}")]
    InsufficientAllowance {
        /// Account whose funds are being moved.
        owner: Address,
        /// Account attempting the move.
        spender: Address,
        /// Remaining allowance.
        allowance: Amount,
        /// Amount requested.
        requested: Amount,
    },

    /// The source account does not hold enough of the asset.
    #[error("insufficient balance: {account} holds {balance}, requested {requested}")]
    InsufficientBalance {
        /// Account being debited.
        account: Address,
        /// Its current balance.
        balance: Amount,
        /// Amount requested.
        requested: Amount,
    },

    /// A credit would overflow the destination balance or the supply.
    #[error("asset overflow crediting {amount}")]
    Overflow {
        /// Amount that overflowed.
        amount: Amount,
    },
}

/// The operations the bridge needs from the asset it wraps.
pub trait UnderlyingAsset: Send + Sync {
    /// Number of decimal places; the wrapped representation mirrors it.
    fn decimals(&self) -> u8;

    /// Balance held by `account`.
    fn balance_of(&self, account: &Address) -> Amount;

    /// Amount `spender` may still move out of `owner`'s balance.
    fn allowance(&self, owner: &Address, spender: &Address) -> Amount;

    /// Moves `amount` from `from` to `to`. Called by `from` itself.
    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<(), AssetError>;

    /// Moves `amount` from `owner` to `to` on behalf of `spender`, consuming
    /// allowance.
    fn transfer_from(
        &self,
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError>;
}

// ---------------------------------------------------------------------------
// InMemoryAsset
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct AssetBook {
    balances: HashMap<Address, Amount>,
    allowances: HashMap<(Address, Address), Amount>,
    total_supply: Amount,
}

impl AssetBook {
    fn debit(&mut self, account: &Address, amount: Amount) -> Result<(), AssetError> {
        let balance = self.balances.get(account).copied().unwrap_or(0);
        if balance < amount {
            return Err(AssetError::InsufficientBalance {
                account: *account,
                balance,
                requested: amount,
            });
        }
        self.balances.insert(*account, balance - amount);
        Ok(())
    }

    fn credit(&mut self, account: &Address, amount: Amount) -> Result<(), AssetError> {
        let balance = self.balances.entry(*account).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(AssetError::Overflow { amount })?;
        Ok(())
    }
}

/// Allowance-based fungible asset kept entirely in memory.
#[derive(Debug)]
pub struct InMemoryAsset {
    symbol: String,
    decimals: u8,
    book: RwLock<AssetBook>,
}

impl InMemoryAsset {
    /// Creates an asset with zero supply.
    pub fn new(symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            symbol: symbol.into(),
            decimals,
            book: RwLock::new(AssetBook::default()),
        }
    }

    /// Ticker symbol.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Creates `amount` new units in `to`'s balance.
    pub fn mint(&self, to: &Address, amount: Amount) -> Result<(), AssetError> {
        let mut book = self.book.write();
        let supply = book
            .total_supply
            .checked_add(amount)
            .ok_or(AssetError::Overflow { amount })?;
        book.credit(to, amount)?;
        book.total_supply = supply;
        debug!(symbol = %self.symbol, to = %to, amount, "asset minted");
        Ok(())
    }

    /// Sets `spender`'s allowance over `owner`'s balance, replacing any
    /// previous value.
    pub fn approve(&self, owner: &Address, spender: &Address, amount: Amount) {
        self.book.write().allowances.insert((*owner, *spender), amount);
    }

    /// Total units in existence.
    pub fn total_supply(&self) -> Amount {
        self.book.read().total_supply
    }
}

impl UnderlyingAsset for InMemoryAsset {
    fn decimals(&self) -> u8 {
        self.decimals
    }

    fn balance_of(&self, account: &Address) -> Amount {
        self.book.read().balances.get(account).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.book
            .read()
            .allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or(0)
    }

    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<(), AssetError> {
        let mut book = self.book.write();
        book.debit(from, amount)?;
        if let Err(e) = book.credit(to, amount) {
            // Undo the debit so the book stays balanced.
            book.balances.entry(*from).and_modify(|b| *b += amount);
            return Err(e);
        }
        Ok(())
    }

    fn transfer_from(
        &self,
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError> {
        let mut book = self.book.write();
        let allowance = book
            .allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or(0);
        if allowance < amount {
            return Err(AssetError::InsufficientAllowance {
                owner: *owner,
                spender: *spender,
                allowance,
                requested: amount,
            });
        }

        book.debit(owner, amount)?;
        if let Err(e) = book.credit(to, amount) {
            book.balances.entry(*owner).and_modify(|b| *b += amount);
            return Err(e);
        }
        book.allowances
            .insert((*owner, *spender), allowance - amount);
        Ok(())
    }
}
