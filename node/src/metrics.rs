//! Metrics collection for node monitoring.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use walletd_common::ErrorKind;

/// Ledger operation kinds that are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Deposit,
    Withdrawal,
    Transfer,
    UserCreated,
}

/// Node metrics.
#[derive(Default)]
pub struct Metrics {
    /// Committed deposits.
    pub deposits_total: AtomicU64,
    /// Committed withdrawals.
    pub withdrawals_total: AtomicU64,
    /// Committed transfers.
    pub transfers_total: AtomicU64,
    /// Users registered.
    pub users_created_total: AtomicU64,
    /// Requests refused for a business reason.
    pub operations_rejected: AtomicU64,
    /// Requests that failed in storage or timed out.
    pub operations_failed: AtomicU64,
    /// Requests in flight.
    pub operations_active: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request entering the ledger.
    pub fn operation_started(&self) {
        self.operations_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed operation.
    pub fn operation_succeeded(&self, operation: Operation) {
        let counter = match operation {
            Operation::Deposit => &self.deposits_total,
            Operation::Withdrawal => &self.withdrawals_total,
            Operation::Transfer => &self.transfers_total,
            Operation::UserCreated => &self.users_created_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.operations_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a failed operation.
    pub fn operation_failed(&self, kind: ErrorKind) {
        match kind {
            ErrorKind::StorageFailure | ErrorKind::AlreadyExists => {
                self.operations_failed.fetch_add(1, Ordering::Relaxed)
            }
            _ => self.operations_rejected.fetch_add(1, Ordering::Relaxed),
        };
        self.operations_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            deposits_total: self.deposits_total.load(Ordering::Relaxed),
            withdrawals_total: self.withdrawals_total.load(Ordering::Relaxed),
            transfers_total: self.transfers_total.load(Ordering::Relaxed),
            users_created_total: self.users_created_total.load(Ordering::Relaxed),
            operations_rejected: self.operations_rejected.load(Ordering::Relaxed),
            operations_failed: self.operations_failed.load(Ordering::Relaxed),
            operations_active: self.operations_active.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP walletd_deposits_total Committed deposits
# TYPE walletd_deposits_total counter
walletd_deposits_total {}

# HELP walletd_withdrawals_total Committed withdrawals
# TYPE walletd_withdrawals_total counter
walletd_withdrawals_total {}

# HELP walletd_transfers_total Committed transfers
# TYPE walletd_transfers_total counter
walletd_transfers_total {}

# HELP walletd_users_created_total Registered users
# TYPE walletd_users_created_total counter
walletd_users_created_total {}

# HELP walletd_operations_rejected Operations refused for a business reason
# TYPE walletd_operations_rejected counter
walletd_operations_rejected {}

# HELP walletd_operations_failed Operations failed in storage
# TYPE walletd_operations_failed counter
walletd_operations_failed {}

# HELP walletd_operations_active Operations in flight
# TYPE walletd_operations_active gauge
walletd_operations_active {}
"#,
            snapshot.deposits_total,
            snapshot.withdrawals_total,
            snapshot.transfers_total,
            snapshot.users_created_total,
            snapshot.operations_rejected,
            snapshot.operations_failed,
            snapshot.operations_active,
        )
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub deposits_total: u64,
    pub withdrawals_total: u64,
    pub transfers_total: u64,
    pub users_created_total: u64,
    pub operations_rejected: u64,
    pub operations_failed: u64,
    pub operations_active: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.operation_started();
        metrics.operation_started();
        metrics.operation_started();
        metrics.operation_succeeded(Operation::Deposit);
        metrics.operation_failed(ErrorKind::InsufficientFunds);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.deposits_total, 1);
        assert_eq!(snapshot.operations_rejected, 1);
        assert_eq!(snapshot.operations_failed, 0);
        assert_eq!(snapshot.operations_active, 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.operation_started();
        metrics.operation_succeeded(Operation::Transfer);

        let output = metrics.to_prometheus();
        assert!(output.contains("walletd_transfers_total 1"));
        assert!(output.contains("walletd_operations_active 0"));
    }
}
