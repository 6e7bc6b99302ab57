//! Time utilities for the walletd ledger.

use chrono::{DateTime, SubsecRound, Utc};

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp at the store's precision.
///
/// PostgreSQL keeps microseconds; truncating here means a record read back
/// from the store equals the one that was written.
pub fn now() -> Timestamp {
    Utc::now().trunc_subsecs(6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_now_is_microsecond_precision() {
        let ts = now();
        assert_eq!(ts.nanosecond() % 1_000, 0);
    }
}
