//! Ledger transaction records.
//!
//! A transaction is the immutable audit entry for one balance-affecting
//! event. It is written in the same unit of work as the balance update it
//! records and is never changed afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use walletd_common::{
    now, Amount, Currency, LedgerError, Result, Timestamp, TransactionId, WalletId,
};

/// Type of balance-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Funds enter a wallet from outside the ledger.
    Deposit,
    /// Funds leave a wallet to outside the ledger.
    Withdrawal,
    /// Funds move between two wallets.
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::Transfer => "TRANSFER",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DEPOSIT" => Ok(TransactionType::Deposit),
            "WITHDRAWAL" => Ok(TransactionType::Withdrawal),
            "TRANSFER" => Ok(TransactionType::Transfer),
            other => Err(LedgerError::storage(
                "transaction.decode",
                format!("unknown transaction type {:?}", other),
            )),
        }
    }
}

/// Transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Completed,
    Pending,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "PENDING" => Ok(TransactionStatus::Pending),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(LedgerError::storage(
                "transaction.decode",
                format!("unknown transaction status {:?}", other),
            )),
        }
    }
}

/// A persisted ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Store-assigned identifier.
    pub id: TransactionId,
    /// Debited wallet; `None` for deposits.
    pub from_wallet_id: Option<WalletId>,
    /// Credited wallet; `None` for withdrawals.
    pub to_wallet_id: Option<WalletId>,
    /// Strictly positive amount.
    pub amount: Amount,
    pub currency: Currency,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    /// When the event occurred.
    pub transaction_time: Timestamp,
    pub description: Option<String>,
    pub created_at: Timestamp,
}

impl Transaction {
    /// Check if this entry debits or credits `wallet_id`.
    pub fn touches(&self, wallet_id: WalletId) -> bool {
        self.from_wallet_id == Some(wallet_id) || self.to_wallet_id == Some(wallet_id)
    }

    /// Effect of this entry on `wallet_id`'s balance.
    ///
    /// Positive when the wallet is the destination, negative when it is the
    /// source, zero when the entry does not touch it.
    pub fn signed_amount_for(&self, wallet_id: WalletId) -> Amount {
        let mut effect = Amount::ZERO;
        if self.to_wallet_id == Some(wallet_id) {
            effect += self.amount;
        }
        if self.from_wallet_id == Some(wallet_id) {
            effect -= self.amount;
        }
        effect
    }
}

/// A ledger entry that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub from_wallet_id: Option<WalletId>,
    pub to_wallet_id: Option<WalletId>,
    pub amount: Amount,
    pub currency: Currency,
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub transaction_time: Timestamp,
    pub description: Option<String>,
    pub created_at: Timestamp,
}

impl NewTransaction {
    fn completed(
        from_wallet_id: Option<WalletId>,
        to_wallet_id: Option<WalletId>,
        amount: Amount,
        currency: Currency,
        kind: TransactionType,
    ) -> Self {
        let now = now();
        Self {
            from_wallet_id,
            to_wallet_id,
            amount,
            currency,
            kind,
            status: TransactionStatus::Completed,
            transaction_time: now,
            description: None,
            created_at: now,
        }
    }

    /// Entry crediting `wallet_id`.
    pub fn deposit(wallet_id: WalletId, amount: Amount, currency: Currency) -> Self {
        Self::completed(None, Some(wallet_id), amount, currency, TransactionType::Deposit)
    }

    /// Entry debiting `wallet_id`.
    pub fn withdrawal(wallet_id: WalletId, amount: Amount, currency: Currency) -> Self {
        Self::completed(Some(wallet_id), None, amount, currency, TransactionType::Withdrawal)
    }

    /// Entry moving funds from `from` to `to`.
    pub fn transfer(from: WalletId, to: WalletId, amount: Amount, currency: Currency) -> Self {
        Self::completed(Some(from), Some(to), amount, currency, TransactionType::Transfer)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check the entry invariants before it is written.
    pub fn validate(&self) -> Result<()> {
        if !self.amount.is_positive() {
            return Err(LedgerError::invalid("amount", "must be greater than zero"));
        }
        match (self.from_wallet_id, self.to_wallet_id) {
            (None, None) => Err(LedgerError::invalid(
                "wallet_id",
                "a transaction needs a source or a destination",
            )),
            (Some(from), Some(to)) if from == to => Err(LedgerError::SameWalletTransfer(from)),
            _ => Ok(()),
        }
    }

    /// Attach the identifier the store assigned.
    pub fn persisted(&self, id: TransactionId) -> Transaction {
        Transaction {
            id,
            from_wallet_id: self.from_wallet_id,
            to_wallet_id: self.to_wallet_id,
            amount: self.amount,
            currency: self.currency.clone(),
            kind: self.kind,
            status: self.status,
            transaction_time: self.transaction_time,
            description: self.description.clone(),
            created_at: self.created_at,
        }
    }
}
