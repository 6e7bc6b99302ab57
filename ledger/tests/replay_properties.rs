//! Property-based tests for ledger invariants
//!
//! - Replay consistency: every wallet's stored balance equals its credits
//!   minus its debits, whatever sequence of operations ran
//! - Non-positive amounts are rejected before any storage access
//! - Funds are conserved by transfers

use proptest::prelude::*;
use rust_decimal::Decimal;
use walletd_common::{Amount, Currency, LedgerError};
use walletd_ledger::{replay_balance, EngineConfig, LedgerEngine, MemoryLedgerEngine, MemoryStore, Wallet};

const WALLETS: usize = 3;

#[derive(Debug, Clone)]
enum Op {
    Deposit { wallet: usize, amount: Amount },
    Withdraw { wallet: usize, amount: Amount },
    Transfer { from: usize, to: usize, amount: Amount },
}

/// Strategy for positive amounts with up to four fractional digits
fn amount_strategy() -> impl Strategy<Value = Amount> {
    (1i64..10_000_000i64).prop_map(|ticks| Amount::new(Decimal::new(ticks, 4)))
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..WALLETS, amount_strategy()).prop_map(|(wallet, amount)| Op::Deposit { wallet, amount }),
        (0..WALLETS, amount_strategy()).prop_map(|(wallet, amount)| Op::Withdraw { wallet, amount }),
        (0..WALLETS, 0..WALLETS, amount_strategy())
            .prop_map(|(from, to, amount)| Op::Transfer { from, to, amount }),
    ]
}

async fn setup() -> (MemoryStore, MemoryLedgerEngine, Vec<Wallet>) {
    let store = MemoryStore::new();
    let engine = LedgerEngine::in_memory(store.clone(), EngineConfig::default());
    let mut wallets = Vec::new();
    for i in 0..WALLETS {
        let (_, wallet) = engine
            .create_user_and_wallet(&format!("user{}", i), &Currency::usd())
            .await
            .unwrap();
        wallets.push(wallet);
    }
    (store, engine, wallets)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: stored balances always equal the replayed history
    #[test]
    fn prop_replay_matches_stored_balance(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (store, engine, wallets) = setup().await;
            let usd = Currency::usd();

            for op in &ops {
                // Business rejections are expected; storage never fails here.
                let result = match op {
                    Op::Deposit { wallet, amount } => {
                        engine.deposit(wallets[*wallet].id, *amount, &usd).await.map(|_| ())
                    }
                    Op::Withdraw { wallet, amount } => {
                        engine.withdraw(wallets[*wallet].id, *amount, &usd).await.map(|_| ())
                    }
                    Op::Transfer { from, to, amount } => engine
                        .transfer(wallets[*from].id, wallets[*to].id, *amount, &usd)
                        .await
                        .map(|_| ()),
                };
                if let Err(err) = result {
                    prop_assert!(matches!(
                        err,
                        LedgerError::InsufficientFunds { .. } | LedgerError::SameWalletTransfer(_)
                    ), "unexpected error: {:?}", err);
                }
            }

            let history = store.transactions();
            for wallet in &wallets {
                let stored = store.wallet(wallet.id).unwrap().balance;
                prop_assert_eq!(stored, replay_balance(wallet.id, &history));
                prop_assert!(!stored.is_negative());

                let report = engine.reconcile_wallet(wallet.id).await.unwrap();
                prop_assert!(report.is_consistent());
            }
            Ok(())
        })?;
    }

    /// Property: transfers move funds without creating or destroying them
    #[test]
    fn prop_transfers_conserve_funds(
        deposits in prop::collection::vec(amount_strategy(), WALLETS),
        transfers in prop::collection::vec((0..WALLETS, 0..WALLETS, amount_strategy()), 1..20),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (store, engine, wallets) = setup().await;
            let usd = Currency::usd();

            for (wallet, amount) in wallets.iter().zip(&deposits) {
                engine.deposit(wallet.id, *amount, &usd).await.unwrap();
            }
            let total: Amount = deposits.iter().copied().sum();

            for (from, to, amount) in &transfers {
                let _ = engine
                    .transfer(wallets[*from].id, wallets[*to].id, *amount, &usd)
                    .await;
            }

            let after: Amount = wallets
                .iter()
                .map(|w| store.wallet(w.id).unwrap().balance)
                .sum();
            prop_assert_eq!(after, total);
            Ok(())
        })?;
    }

    /// Property: non-positive amounts never open a unit of work or write
    #[test]
    fn prop_non_positive_amounts_touch_nothing(ticks in -10_000_000i64..=0i64) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (store, engine, wallets) = setup().await;
            let usd = Currency::usd();
            let amount = Amount::new(Decimal::new(ticks, 4));
            store.reset_stats();

            let deposit = engine.deposit(wallets[0].id, amount, &usd).await;
            let withdraw = engine.withdraw(wallets[0].id, amount, &usd).await;
            let transfer = engine.transfer(wallets[0].id, wallets[1].id, amount, &usd).await;

            prop_assert!(matches!(deposit, Err(LedgerError::InvalidInput { .. })), "unexpected result: {:?}", deposit);
            prop_assert!(matches!(withdraw, Err(LedgerError::InvalidInput { .. })), "unexpected result: {:?}", withdraw);
            prop_assert!(matches!(transfer, Err(LedgerError::InvalidInput { .. })), "unexpected result: {:?}", transfer);

            let stats = store.stats();
            prop_assert_eq!(stats.begins, 0);
            prop_assert_eq!(stats.acquires, 0);
            prop_assert_eq!(stats.writes, 0);
            Ok(())
        })?;
    }
}
