//! Core ledger engine implementation.
//!
//! Every mutating operation runs the same way: validate the request, open
//! a unit of work, read and check, write the balance deltas and the ledger
//! entry, then commit. Any failure after the unit is opened rolls it back
//! before the error is returned.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, error, info, instrument, warn};

use walletd_common::{Amount, Currency, ErrorKind, LedgerError, Result, UserId, WalletId};

use crate::balance::Reconciliation;
use crate::config::EngineConfig;
use crate::coordinator::{TransactionCoordinator, UnitOfWork};
use crate::gateway::{TransactionGateway, UserGateway, WalletGateway};
use crate::memory::MemoryStore;
use crate::page::{Page, PageRequest};
use crate::postgres::{PgCoordinator, PgTransactionGateway, PgUserGateway, PgWalletGateway};
use crate::transaction::{NewTransaction, Transaction};
use crate::user::{validate_username, NewUser, User};
use crate::wallet::{NewWallet, Wallet};

/// Result of a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub from_wallet: Wallet,
    pub to_wallet: Wallet,
    pub transaction: Transaction,
}

/// Amounts must be positive and fit the store's scale and precision.
fn validate_amount(amount: Amount) -> Result<()> {
    if !amount.is_positive() {
        return Err(LedgerError::invalid("amount", "must be greater than zero"));
    }
    Amount::checked(amount.as_decimal()).map_err(|e| LedgerError::invalid("amount", e.to_string()))?;
    Ok(())
}

fn validate_currency(currency: &Currency) -> Result<()> {
    if !currency.is_valid() {
        return Err(LedgerError::invalid(
            "currency",
            format!(
                "must be 1 to {} ASCII letters or digits, got {:?}",
                Currency::MAX_LEN,
                currency.code()
            ),
        ));
    }
    Ok(())
}

fn validate_wallet_id(field: &'static str, id: WalletId) -> Result<()> {
    if !id.is_valid() {
        return Err(LedgerError::invalid(field, format!("invalid wallet id {}", id)));
    }
    Ok(())
}

/// The ledger engine owns the balance-mutation rules.
///
/// It is built from a coordinator, one gateway per record type and its
/// configuration; it keeps no other state and is shared behind an `Arc`.
pub struct LedgerEngine<T, U, W, X> {
    coordinator: T,
    users: U,
    wallets: W,
    transactions: X,
    config: EngineConfig,
}

/// Engine over PostgreSQL.
pub type PgLedgerEngine =
    LedgerEngine<PgCoordinator, PgUserGateway, PgWalletGateway, PgTransactionGateway>;

/// Engine over the in-memory store.
pub type MemoryLedgerEngine = LedgerEngine<MemoryStore, MemoryStore, MemoryStore, MemoryStore>;

impl PgLedgerEngine {
    pub fn postgres(pool: sqlx::PgPool, config: EngineConfig) -> Self {
        LedgerEngine::new(
            PgCoordinator::new(pool),
            PgUserGateway,
            PgWalletGateway,
            PgTransactionGateway,
            config,
        )
    }
}

impl MemoryLedgerEngine {
    pub fn in_memory(store: MemoryStore, config: EngineConfig) -> Self {
        LedgerEngine::new(store.clone(), store.clone(), store.clone(), store, config)
    }
}

impl<T, U, W, X> LedgerEngine<T, U, W, X>
where
    T: TransactionCoordinator,
    U: UserGateway<T::Context>,
    W: WalletGateway<T::Context>,
    X: TransactionGateway<T::Context>,
{
    /// Create a new ledger engine.
    pub fn new(coordinator: T, users: U, wallets: W, transactions: X, config: EngineConfig) -> Self {
        Self {
            coordinator,
            users,
            wallets,
            transactions,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Credit `amount` to a wallet.
    #[instrument(skip(self))]
    pub async fn deposit(
        &self,
        wallet_id: WalletId,
        amount: Amount,
        currency: &Currency,
    ) -> Result<(Wallet, Transaction)> {
        self.bounded("deposit", async {
            validate_wallet_id("wallet_id", wallet_id)?;
            validate_amount(amount)?;
            validate_currency(currency)?;

            let mut unit = self.coordinator.begin().await?;
            let outcome = self.apply_deposit(&mut unit, wallet_id, amount, currency).await;
            let (wallet, entry) = self.finish("deposit", unit, outcome).await?;

            info!(
                wallet_id = %wallet.id,
                transaction_id = %entry.id,
                amount = %amount,
                balance = %wallet.balance,
                "Deposit committed"
            );
            Ok((wallet, entry))
        })
        .await
    }

    async fn apply_deposit(
        &self,
        unit: &mut T::Unit,
        wallet_id: WalletId,
        amount: Amount,
        currency: &Currency,
    ) -> Result<(Wallet, Transaction)> {
        let ctx = unit.context()?;

        let wallet = self.wallets.get_by_id_for_update(ctx, wallet_id).await?;
        wallet.ensure_currency(currency)?;

        self.wallets.update_balance(ctx, wallet_id, amount).await?;
        let entry = NewTransaction::deposit(wallet_id, amount, currency.clone());
        let entry = self.transactions.create(ctx, &entry).await?;

        let wallet = self.wallets.get_by_id(ctx, wallet_id).await?;
        Ok((wallet, entry))
    }

    /// Debit `amount` from a wallet.
    #[instrument(skip(self))]
    pub async fn withdraw(
        &self,
        wallet_id: WalletId,
        amount: Amount,
        currency: &Currency,
    ) -> Result<(Wallet, Transaction)> {
        self.bounded("withdraw", async {
            validate_wallet_id("wallet_id", wallet_id)?;
            validate_amount(amount)?;
            validate_currency(currency)?;

            let mut unit = self.coordinator.begin().await?;
            let outcome = self.apply_withdraw(&mut unit, wallet_id, amount, currency).await;
            let (wallet, entry) = self.finish("withdraw", unit, outcome).await?;

            info!(
                wallet_id = %wallet.id,
                transaction_id = %entry.id,
                amount = %amount,
                balance = %wallet.balance,
                "Withdrawal committed"
            );
            Ok((wallet, entry))
        })
        .await
    }

    async fn apply_withdraw(
        &self,
        unit: &mut T::Unit,
        wallet_id: WalletId,
        amount: Amount,
        currency: &Currency,
    ) -> Result<(Wallet, Transaction)> {
        let ctx = unit.context()?;

        let wallet = self.wallets.get_by_id_for_update(ctx, wallet_id).await?;
        wallet.ensure_currency(currency)?;
        wallet.ensure_funds(amount)?;

        self.wallets.update_balance(ctx, wallet_id, -amount).await?;
        let entry = NewTransaction::withdrawal(wallet_id, amount, currency.clone());
        let entry = self.transactions.create(ctx, &entry).await?;

        let wallet = self.wallets.get_by_id(ctx, wallet_id).await?;
        Ok((wallet, entry))
    }

    /// Move `amount` between two wallets of the same currency.
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
        amount: Amount,
        currency: &Currency,
    ) -> Result<TransferOutcome> {
        self.bounded("transfer", async {
            validate_wallet_id("from_wallet_id", from_wallet_id)?;
            validate_wallet_id("to_wallet_id", to_wallet_id)?;
            validate_amount(amount)?;
            validate_currency(currency)?;
            if from_wallet_id == to_wallet_id {
                return Err(LedgerError::SameWalletTransfer(from_wallet_id));
            }

            let mut unit = self.coordinator.begin().await?;
            let outcome = self
                .apply_transfer(&mut unit, from_wallet_id, to_wallet_id, amount, currency)
                .await;
            let outcome = self.finish("transfer", unit, outcome).await?;

            info!(
                from_wallet_id = %from_wallet_id,
                to_wallet_id = %to_wallet_id,
                transaction_id = %outcome.transaction.id,
                amount = %amount,
                "Transfer committed"
            );
            Ok(outcome)
        })
        .await
    }

    async fn apply_transfer(
        &self,
        unit: &mut T::Unit,
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
        amount: Amount,
        currency: &Currency,
    ) -> Result<TransferOutcome> {
        let ctx = unit.context()?;

        // Lock in id order so opposite transfers cannot deadlock; outcomes
        // are judged source first.
        let (source, destination) = if from_wallet_id < to_wallet_id {
            let source = self.wallets.get_by_id_for_update(ctx, from_wallet_id).await;
            let destination = self.wallets.get_by_id_for_update(ctx, to_wallet_id).await;
            (source, destination)
        } else {
            let destination = self.wallets.get_by_id_for_update(ctx, to_wallet_id).await;
            let source = self.wallets.get_by_id_for_update(ctx, from_wallet_id).await;
            (source, destination)
        };

        let source = source?;
        source.ensure_currency(currency)?;
        let destination = destination?;
        destination.ensure_currency(currency)?;
        source.ensure_funds(amount)?;

        self.wallets.update_balance(ctx, from_wallet_id, -amount).await?;
        self.wallets.update_balance(ctx, to_wallet_id, amount).await?;

        let entry = NewTransaction::transfer(from_wallet_id, to_wallet_id, amount, currency.clone());
        let transaction = self.transactions.create(ctx, &entry).await?;

        let from_wallet = self.wallets.get_by_id(ctx, from_wallet_id).await?;
        let to_wallet = self.wallets.get_by_id(ctx, to_wallet_id).await?;
        Ok(TransferOutcome {
            from_wallet,
            to_wallet,
            transaction,
        })
    }

    /// Get a wallet with its current balance.
    #[instrument(skip(self))]
    pub async fn get_balance(&self, wallet_id: WalletId) -> Result<Wallet> {
        self.bounded("get_balance", async {
            validate_wallet_id("wallet_id", wallet_id)?;
            let mut conn = self.coordinator.acquire().await?;
            self.wallets.get_by_id(&mut *conn, wallet_id).await
        })
        .await
    }

    /// Page through a wallet's history, newest first.
    #[instrument(skip(self))]
    pub async fn get_transaction_history(
        &self,
        wallet_id: WalletId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Page<Transaction>> {
        self.bounded("get_transaction_history", async {
            validate_wallet_id("wallet_id", wallet_id)?;
            let page = PageRequest::resolve(
                limit,
                offset,
                self.config.default_page_size,
                self.config.max_page_size,
            );

            let mut conn = self.coordinator.acquire().await?;
            self.wallets.get_by_id(&mut *conn, wallet_id).await?;
            self.transactions.list_by_wallet(&mut *conn, wallet_id, page).await
        })
        .await
    }

    /// Register a user together with their first wallet.
    #[instrument(skip(self))]
    pub async fn create_user_and_wallet(
        &self,
        username: &str,
        currency: &Currency,
    ) -> Result<(User, Wallet)> {
        self.bounded("create_user_and_wallet", async {
            validate_username(username)?;
            validate_currency(currency)?;

            let mut unit = self.coordinator.begin().await?;
            let outcome = self.apply_create_user(&mut unit, username, currency).await;
            let (user, wallet) = self.finish("create_user_and_wallet", unit, outcome).await?;

            info!(
                user_id = %user.id,
                wallet_id = %wallet.id,
                currency = %wallet.currency,
                "User and wallet created"
            );
            Ok((user, wallet))
        })
        .await
    }

    async fn apply_create_user(
        &self,
        unit: &mut T::Unit,
        username: &str,
        currency: &Currency,
    ) -> Result<(User, Wallet)> {
        let ctx = unit.context()?;

        match self.users.get_by_username(ctx, username).await {
            Ok(_) => return Err(LedgerError::AlreadyExists(format!("username {}", username))),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let user = self.users.create(ctx, &NewUser::new(username)).await?;
        let wallet = self
            .wallets
            .create(ctx, &NewWallet::new(user.id, currency.clone()))
            .await?;
        Ok((user, wallet))
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, user_id: UserId) -> Result<User> {
        self.bounded("get_user", async {
            if !user_id.is_valid() {
                return Err(LedgerError::invalid("user_id", format!("invalid user id {}", user_id)));
            }
            let mut conn = self.coordinator.acquire().await?;
            self.users.get_by_id(&mut *conn, user_id).await
        })
        .await
    }

    /// Find the wallet a user holds in `currency`.
    #[instrument(skip(self))]
    pub async fn find_wallet(&self, user_id: UserId, currency: &Currency) -> Result<Wallet> {
        self.bounded("find_wallet", async {
            validate_currency(currency)?;
            let mut conn = self.coordinator.acquire().await?;
            self.wallets
                .get_by_user_and_currency(&mut *conn, user_id, currency)
                .await
        })
        .await
    }

    /// Compare a wallet's stored balance with its replayed history.
    ///
    /// Both are read inside one unit of work so they describe the same
    /// snapshot.
    #[instrument(skip(self))]
    pub async fn reconcile_wallet(&self, wallet_id: WalletId) -> Result<Reconciliation> {
        self.bounded("reconcile_wallet", async {
            validate_wallet_id("wallet_id", wallet_id)?;

            let mut unit = self.coordinator.begin().await?;
            let outcome = self.apply_reconcile(&mut unit, wallet_id).await;
            let report = self.finish("reconcile_wallet", unit, outcome).await?;

            if report.is_consistent() {
                debug!(wallet_id = %wallet_id, entries = report.entries, "Wallet reconciled");
            } else {
                warn!(
                    wallet_id = %wallet_id,
                    stored = %report.stored_balance,
                    replayed = %report.replayed_balance,
                    drift = %report.drift(),
                    "Stored balance differs from transaction history"
                );
            }
            Ok(report)
        })
        .await
    }

    async fn apply_reconcile(&self, unit: &mut T::Unit, wallet_id: WalletId) -> Result<Reconciliation> {
        let ctx = unit.context()?;
        let wallet = self.wallets.get_by_id(ctx, wallet_id).await?;
        let totals = self.transactions.replay_totals(ctx, wallet_id).await?;
        Ok(Reconciliation::new(wallet_id, wallet.balance, totals))
    }

    /// Check that the store answers.
    pub async fn check_store(&self) -> Result<()> {
        self.bounded("check_store", self.coordinator.ping()).await
    }

    /// Commit on success, then roll back unconditionally.
    ///
    /// Rollback is a no-op after a successful commit and cleans up after a
    /// failed one.
    async fn finish<R: Send>(
        &self,
        operation: &'static str,
        mut unit: T::Unit,
        outcome: Result<R>,
    ) -> Result<R> {
        let result = match outcome {
            Ok(value) => unit.commit().await.map(|_| value),
            Err(err) => Err(err),
        };

        if let Err(rollback_err) = unit.rollback().await {
            error!(operation, error = %rollback_err, "Rollback failed");
        }

        if let Err(err) = &result {
            match err.kind() {
                ErrorKind::StorageFailure | ErrorKind::AlreadyExists => {
                    error!(operation, error = %err, "Operation rolled back")
                }
                _ => debug!(operation, error = %err, "Operation rejected"),
            }
        }
        result
    }

    /// Apply the configured deadline to an operation.
    ///
    /// On expiry the future is dropped, which drops and discards any open
    /// unit of work.
    async fn bounded<R>(&self, operation: &'static str, fut: impl Future<Output = Result<R>>) -> Result<R> {
        match self.config.operation_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        operation,
                        timeout_ms = limit.as_millis() as u64,
                        "Operation timed out"
                    );
                    Err(LedgerError::Timeout(operation))
                }
            },
            None => fut.await,
        }
    }
}

/// Object-safe view of the engine for callers that should not carry its
/// type parameters.
#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn deposit(
        &self,
        wallet_id: WalletId,
        amount: Amount,
        currency: &Currency,
    ) -> Result<(Wallet, Transaction)>;

    async fn withdraw(
        &self,
        wallet_id: WalletId,
        amount: Amount,
        currency: &Currency,
    ) -> Result<(Wallet, Transaction)>;

    async fn transfer(
        &self,
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
        amount: Amount,
        currency: &Currency,
    ) -> Result<TransferOutcome>;

    async fn get_balance(&self, wallet_id: WalletId) -> Result<Wallet>;

    async fn get_transaction_history(
        &self,
        wallet_id: WalletId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Page<Transaction>>;

    async fn create_user_and_wallet(&self, username: &str, currency: &Currency) -> Result<(User, Wallet)>;

    async fn get_user(&self, user_id: UserId) -> Result<User>;

    async fn find_wallet(&self, user_id: UserId, currency: &Currency) -> Result<Wallet>;

    async fn reconcile_wallet(&self, wallet_id: WalletId) -> Result<Reconciliation>;

    async fn check_store(&self) -> Result<()>;
}

#[async_trait]
impl<T, U, W, X> LedgerService for LedgerEngine<T, U, W, X>
where
    T: TransactionCoordinator + 'static,
    U: UserGateway<T::Context> + 'static,
    W: WalletGateway<T::Context> + 'static,
    X: TransactionGateway<T::Context> + 'static,
{
    async fn deposit(
        &self,
        wallet_id: WalletId,
        amount: Amount,
        currency: &Currency,
    ) -> Result<(Wallet, Transaction)> {
        LedgerEngine::deposit(self, wallet_id, amount, currency).await
    }

    async fn withdraw(
        &self,
        wallet_id: WalletId,
        amount: Amount,
        currency: &Currency,
    ) -> Result<(Wallet, Transaction)> {
        LedgerEngine::withdraw(self, wallet_id, amount, currency).await
    }

    async fn transfer(
        &self,
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
        amount: Amount,
        currency: &Currency,
    ) -> Result<TransferOutcome> {
        LedgerEngine::transfer(self, from_wallet_id, to_wallet_id, amount, currency).await
    }

    async fn get_balance(&self, wallet_id: WalletId) -> Result<Wallet> {
        LedgerEngine::get_balance(self, wallet_id).await
    }

    async fn get_transaction_history(
        &self,
        wallet_id: WalletId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Page<Transaction>> {
        LedgerEngine::get_transaction_history(self, wallet_id, limit, offset).await
    }

    async fn create_user_and_wallet(&self, username: &str, currency: &Currency) -> Result<(User, Wallet)> {
        LedgerEngine::create_user_and_wallet(self, username, currency).await
    }

    async fn get_user(&self, user_id: UserId) -> Result<User> {
        LedgerEngine::get_user(self, user_id).await
    }

    async fn find_wallet(&self, user_id: UserId, currency: &Currency) -> Result<Wallet> {
        LedgerEngine::find_wallet(self, user_id, currency).await
    }

    async fn reconcile_wallet(&self, wallet_id: WalletId) -> Result<Reconciliation> {
        LedgerEngine::reconcile_wallet(self, wallet_id).await
    }

    async fn check_store(&self) -> Result<()> {
        LedgerEngine::check_store(self).await
    }
}
