//! Error types for the walletd ledger.

use crate::{Amount, Currency, UserId, WalletId};
use std::fmt;
use thiserror::Error;

/// Stable, classifiable error kinds.
///
/// The boundary layer picks status codes from the kind, never from the
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    CurrencyMismatch,
    InsufficientFunds,
    SameWalletTransfer,
    AlreadyExists,
    StorageFailure,
}

impl ErrorKind {
    /// HTTP status code the translation layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidInput => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::InsufficientFunds => 402,
            ErrorKind::SameWalletTransfer => 400,
            ErrorKind::CurrencyMismatch => 400,
            ErrorKind::AlreadyExists | ErrorKind::StorageFailure => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::CurrencyMismatch => "currency_mismatch",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::SameWalletTransfer => "same_wallet_transfer",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::StorageFailure => "storage_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Non-positive or malformed amount, identifier or name.
    #[error("Invalid {field}: {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    /// Wallet not found.
    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    /// User holds no wallet in the currency.
    #[error("No {currency} wallet for user {user_id}")]
    NoWalletInCurrency { user_id: UserId, currency: Currency },

    /// User not found (by id or username).
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Operation currency differs from the wallet currency.
    #[error("Currency mismatch: wallet holds {expected}, operation uses {actual}")]
    CurrencyMismatch { expected: Currency, actual: Currency },

    /// Balance lower than the requested amount.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    /// Transfer source and destination are the same wallet.
    #[error("Cannot transfer from wallet {0} to itself")]
    SameWalletTransfer(WalletId),

    /// Unique business key already taken.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Underlying storage I/O failed.
    #[error("Storage failure during {operation}: {detail}")]
    Storage {
        operation: &'static str,
        detail: String,
    },

    /// Operation deadline elapsed; any open unit of work was aborted.
    #[error("Operation timed out: {0}")]
    Timeout(&'static str),
}

impl LedgerError {
    /// Build an invalid-input error.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        LedgerError::InvalidInput {
            field,
            message: message.into(),
        }
    }

    /// Wrap an underlying storage error.
    pub fn storage(operation: &'static str, err: impl fmt::Display) -> Self {
        LedgerError::Storage {
            operation,
            detail: err.to_string(),
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidInput { .. } => ErrorKind::InvalidInput,
            LedgerError::WalletNotFound(_)
            | LedgerError::NoWalletInCurrency { .. }
            | LedgerError::UserNotFound(_) => ErrorKind::NotFound,
            LedgerError::CurrencyMismatch { .. } => ErrorKind::CurrencyMismatch,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::SameWalletTransfer(_) => ErrorKind::SameWalletTransfer,
            LedgerError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            LedgerError::Storage { .. } | LedgerError::Timeout(_) => ErrorKind::StorageFailure,
        }
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Get error code for wire responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::InvalidInput { .. } => "INVALID_INPUT",
            LedgerError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            LedgerError::NoWalletInCurrency { .. } => "WALLET_NOT_FOUND",
            LedgerError::UserNotFound(_) => "USER_NOT_FOUND",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::SameWalletTransfer(_) => "SAME_WALLET_TRANSFER",
            LedgerError::AlreadyExists(_) => "ALREADY_EXISTS",
            LedgerError::Storage { .. } => "STORAGE_FAILURE",
            LedgerError::Timeout(_) => "TIMEOUT",
        }
    }

    /// Message safe to show outside the process.
    ///
    /// Storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            LedgerError::Storage { .. } | LedgerError::Timeout(_) => {
                "Internal server error".to_string()
            }
            LedgerError::WalletNotFound(_)
            | LedgerError::NoWalletInCurrency { .. }
            | LedgerError::UserNotFound(_) => "Resource not found".to_string(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
