//! Identifier types for walletd entities.
//!
//! All identifiers are numeric and assigned by the store on insert.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

macro_rules! store_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw store identifier.
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the raw value.
            pub fn get(&self) -> i64 {
                self.0
            }

            /// Store identifiers are always positive.
            pub fn is_valid(&self) -> bool {
                self.0 > 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.trim().parse()?))
            }
        }
    };
}

store_id!(
    /// Unique identifier for a user.
    UserId
);

store_id!(
    /// Unique identifier for a wallet.
    WalletId
);

store_id!(
    /// Unique identifier for a ledger transaction.
    TransactionId
);
