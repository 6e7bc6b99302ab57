//! Wallet definitions for the ledger.

use serde::{Deserialize, Serialize};
use walletd_common::{now, Amount, Currency, LedgerError, Result, Timestamp, UserId, WalletId};

/// A currency-scoped balance owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Unique wallet identifier.
    pub id: WalletId,
    /// Owning user.
    pub user_id: UserId,
    /// Wallet currency, fixed at creation.
    pub currency: Currency,
    /// Current balance.
    pub balance: Amount,
    /// When the wallet was created.
    pub created_at: Timestamp,
    /// When the balance last changed.
    pub updated_at: Timestamp,
}

impl Wallet {
    /// Check if the wallet can cover `amount`.
    pub fn has_sufficient_funds(&self, amount: Amount) -> bool {
        self.balance >= amount
    }

    /// Fail unless the operation currency matches exactly.
    pub fn ensure_currency(&self, currency: &Currency) -> Result<()> {
        if &self.currency != currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: self.currency.clone(),
                actual: currency.clone(),
            });
        }
        Ok(())
    }

    /// Fail unless the balance covers `amount`.
    pub fn ensure_funds(&self, amount: Amount) -> Result<()> {
        if !self.has_sufficient_funds(amount) {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: self.balance,
            });
        }
        Ok(())
    }
}

/// A wallet that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewWallet {
    pub user_id: UserId,
    pub currency: Currency,
    pub balance: Amount,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl NewWallet {
    /// A zero-balance wallet for `user_id`.
    pub fn new(user_id: UserId, currency: Currency) -> Self {
        let now = now();
        Self {
            user_id,
            currency,
            balance: Amount::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the identifier the store assigned.
    pub fn persisted(&self, id: WalletId) -> Wallet {
        Wallet {
            id,
            user_id: self.user_id,
            currency: self.currency.clone(),
            balance: self.balance,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
