//! User records.

use serde::{Deserialize, Serialize};
use walletd_common::{now, LedgerError, Result, Timestamp, UserId};

/// Longest accepted username.
pub const MAX_USERNAME_LEN: usize = 64;

/// Identity anchor for wallets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Store-assigned identifier.
    pub id: UserId,
    /// Unique, immutable business key.
    pub username: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A user that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl NewUser {
    pub fn new(username: impl Into<String>) -> Self {
        let now = now();
        Self {
            username: username.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the identifier the store assigned.
    pub fn persisted(&self, id: UserId) -> User {
        User {
            id,
            username: self.username.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Reject empty, padded or oversized usernames.
pub fn validate_username(username: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(LedgerError::invalid("username", "must not be empty"));
    }
    if username.trim() != username {
        return Err(LedgerError::invalid(
            "username",
            "must not start or end with whitespace",
        ));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(LedgerError::invalid(
            "username",
            format!("must be at most {} characters", MAX_USERNAME_LEN),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_validation() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("   ").is_err());
        assert!(validate_username(" alice").is_err());
        assert!(validate_username(&"a".repeat(MAX_USERNAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_persisted_keeps_timestamps() {
        let new_user = NewUser::new("alice");
        let user = new_user.persisted(UserId::new(5));
        assert_eq!(user.id, UserId::new(5));
        assert_eq!(user.created_at, new_user.created_at);
        assert_eq!(user.created_at, user.updated_at);
    }
}
