//! Balance replay and reconciliation.
//!
//! A wallet's balance is fully determined by its transaction history:
//! everything credited to it minus everything debited from it.

use serde::{Deserialize, Serialize};
use walletd_common::{Amount, WalletId};

use crate::transaction::Transaction;

/// Aggregated history of one wallet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayTotals {
    /// Sum of amounts where the wallet is the destination.
    pub credited: Amount,
    /// Sum of amounts where the wallet is the source.
    pub debited: Amount,
    /// Number of entries touching the wallet.
    pub entries: u64,
}

impl ReplayTotals {
    /// Balance implied by the history.
    pub fn balance(&self) -> Amount {
        self.credited - self.debited
    }

    /// Fold one entry into the totals.
    pub fn apply(&mut self, wallet_id: WalletId, entry: &Transaction) {
        if !entry.touches(wallet_id) {
            return;
        }
        if entry.to_wallet_id == Some(wallet_id) {
            self.credited += entry.amount;
        }
        if entry.from_wallet_id == Some(wallet_id) {
            self.debited += entry.amount;
        }
        self.entries += 1;
    }
}

/// Replay `history` for `wallet_id`.
pub fn replay_totals<'a, I>(wallet_id: WalletId, history: I) -> ReplayTotals
where
    I: IntoIterator<Item = &'a Transaction>,
{
    let mut totals = ReplayTotals::default();
    for entry in history {
        totals.apply(wallet_id, entry);
    }
    totals
}

/// Balance of `wallet_id` reconstructed from `history`.
pub fn replay_balance<'a, I>(wallet_id: WalletId, history: I) -> Amount
where
    I: IntoIterator<Item = &'a Transaction>,
{
    replay_totals(wallet_id, history).balance()
}

/// Stored balance compared against the replayed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub wallet_id: WalletId,
    pub stored_balance: Amount,
    pub replayed_balance: Amount,
    pub entries: u64,
}

impl Reconciliation {
    pub fn new(wallet_id: WalletId, stored_balance: Amount, totals: ReplayTotals) -> Self {
        Self {
            wallet_id,
            stored_balance,
            replayed_balance: totals.balance(),
            entries: totals.entries,
        }
    }

    /// Check if the stored balance matches the history.
    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.replayed_balance
    }

    /// Stored minus replayed.
    pub fn drift(&self) -> Amount {
        self.stored_balance - self.replayed_balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::NewTransaction;
    use rust_decimal_macros::dec;
    use walletd_common::{Currency, TransactionId};

    fn history(wallet: WalletId, other: WalletId) -> Vec<Transaction> {
        vec![
            NewTransaction::deposit(wallet, Amount::new(dec!(500)), Currency::usd())
                .persisted(TransactionId::new(1)),
            NewTransaction::withdrawal(wallet, Amount::new(dec!(150)), Currency::usd())
                .persisted(TransactionId::new(2)),
            NewTransaction::transfer(other, wallet, Amount::new(dec!(200)), Currency::usd())
                .persisted(TransactionId::new(3)),
            NewTransaction::deposit(other, Amount::new(dec!(75)), Currency::usd())
                .persisted(TransactionId::new(4)),
        ]
    }

    #[test]
    fn test_replay_ignores_unrelated_entries() {
        let wallet = WalletId::new(1);
        let other = WalletId::new(2);
        let totals = replay_totals(wallet, &history(wallet, other));

        assert_eq!(totals.credited, Amount::new(dec!(700)));
        assert_eq!(totals.debited, Amount::new(dec!(150)));
        assert_eq!(totals.entries, 3);
        assert_eq!(totals.balance().to_fixed_string(), "550.0000");
    }

    #[test]
    fn test_replay_of_transfer_source() {
        let wallet = WalletId::new(1);
        let other = WalletId::new(2);
        assert_eq!(
            replay_balance(other, &history(wallet, other)),
            Amount::new(dec!(-125))
        );
    }

    #[test]
    fn test_reconciliation_drift() {
        let wallet = WalletId::new(1);
        let totals = replay_totals(wallet, &history(wallet, WalletId::new(2)));

        let clean = Reconciliation::new(wallet, Amount::new(dec!(550)), totals);
        assert!(clean.is_consistent());
        assert!(clean.drift().is_zero());

        let drifted = Reconciliation::new(wallet, Amount::new(dec!(560)), totals);
        assert!(!drifted.is_consistent());
        assert_eq!(drifted.drift(), Amount::new(dec!(10)));
    }
}
