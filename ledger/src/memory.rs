//! In-memory store.
//!
//! Implements the coordinator and every gateway without a database. Units
//! of work are serialized and operate on a private copy of the state that
//! replaces the shared state on commit, so an abandoned unit leaves no
//! trace. The store records how it was used and can be told to fail at a
//! given point, which makes it the double for engine and HTTP tests.
//!
//! Writes through a plain connection apply immediately and are not
//! isolated from open units.
//!
//! Not for production use: every unit of work copies the whole state,
//! transaction log included, so its cost grows with history.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use walletd_common::{now, Amount, Currency, LedgerError, Result, TransactionId, UserId, WalletId};

use crate::balance::{self, ReplayTotals};
use crate::coordinator::{TransactionCoordinator, UnitOfWork};
use crate::gateway::{TransactionGateway, UserGateway, WalletGateway};
use crate::page::{Page, PageRequest};
use crate::transaction::{NewTransaction, Transaction};
use crate::user::{NewUser, User};
use crate::wallet::{NewWallet, Wallet};

/// Place where an injected failure can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Acquire,
    Begin,
    Commit,
    CreateUser,
    CreateWallet,
    ReadWallet,
    UpdateBalance,
    AppendTransaction,
}

impl FaultPoint {
    fn operation(&self) -> &'static str {
        match self {
            FaultPoint::Acquire => "memory.acquire",
            FaultPoint::Begin => "memory.begin",
            FaultPoint::Commit => "memory.commit",
            FaultPoint::CreateUser => "memory.create_user",
            FaultPoint::CreateWallet => "memory.create_wallet",
            FaultPoint::ReadWallet => "memory.read_wallet",
            FaultPoint::UpdateBalance => "memory.update_balance",
            FaultPoint::AppendTransaction => "memory.append_transaction",
        }
    }
}

/// Usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Plain connections handed out.
    pub acquires: u64,
    /// Units of work opened.
    pub begins: u64,
    /// Units of work committed.
    pub commits: u64,
    /// Calls to `rollback`, including no-op ones.
    pub rollback_calls: u64,
    /// Units whose writes were discarded by rollback or a failed commit.
    pub rolled_back: u64,
    /// Units dropped while still open.
    pub discarded: u64,
    pub reads: u64,
    /// Successful writes, committed or not.
    pub writes: u64,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: BTreeMap<UserId, User>,
    wallets: BTreeMap<WalletId, Wallet>,
    transactions: Vec<Transaction>,
    last_user_id: i64,
    last_wallet_id: i64,
    last_transaction_id: i64,
}

impl MemoryState {
    fn insert_user(&mut self, user: &NewUser) -> Result<User> {
        if self.users.values().any(|u| u.username == user.username) {
            return Err(LedgerError::AlreadyExists(format!("username {}", user.username)));
        }
        self.last_user_id += 1;
        let user = user.persisted(UserId::new(self.last_user_id));
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn insert_wallet(&mut self, wallet: &NewWallet) -> Result<Wallet> {
        if !self.users.contains_key(&wallet.user_id) {
            return Err(LedgerError::storage(
                "wallet.create",
                format!("foreign key violation: user {} does not exist", wallet.user_id),
            ));
        }
        if self
            .wallets
            .values()
            .any(|w| w.user_id == wallet.user_id && w.currency == wallet.currency)
        {
            return Err(LedgerError::AlreadyExists(format!(
                "{} wallet for user {}",
                wallet.currency, wallet.user_id
            )));
        }
        self.last_wallet_id += 1;
        let wallet = wallet.persisted(WalletId::new(self.last_wallet_id));
        self.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    fn wallet(&self, id: WalletId) -> Result<Wallet> {
        self.wallets
            .get(&id)
            .cloned()
            .ok_or(LedgerError::WalletNotFound(id))
    }
}

struct Shared {
    state: Mutex<MemoryState>,
    stats: Mutex<MemoryStats>,
    faults: Mutex<HashMap<FaultPoint, usize>>,
    unit_gate: Arc<AsyncMutex<()>>,
}

impl Shared {
    fn inject(&self, point: FaultPoint) -> Result<()> {
        let mut faults = self.faults.lock();
        if let Some(remaining) = faults.get_mut(&point) {
            *remaining -= 1;
            if *remaining == 0 {
                faults.remove(&point);
                debug!(?point, "Injected failure fired");
                return Err(LedgerError::storage(point.operation(), "injected failure"));
            }
        }
        Ok(())
    }
}

/// Shared handle to an in-memory ledger store.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("stats", &self.stats())
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MemoryState::default()),
                stats: Mutex::new(MemoryStats::default()),
                faults: Mutex::new(HashMap::new()),
                unit_gate: Arc::new(AsyncMutex::new(())),
            }),
        }
    }

    /// Current usage counters.
    pub fn stats(&self) -> MemoryStats {
        *self.shared.stats.lock()
    }

    pub fn reset_stats(&self) {
        *self.shared.stats.lock() = MemoryStats::default();
    }

    /// Fail the next call at `point`.
    pub fn fail_next(&self, point: FaultPoint) {
        self.fail_nth(point, 1);
    }

    /// Fail the `n`th call at `point`, counting from one.
    pub fn fail_nth(&self, point: FaultPoint, n: usize) {
        self.shared.faults.lock().insert(point, n.max(1));
    }

    /// Insert a user directly into committed state.
    ///
    /// Seeding bypasses fault injection and counters; do not seed while a
    /// unit of work is open.
    pub fn seed_user(&self, username: &str) -> Result<User> {
        self.shared.state.lock().insert_user(&NewUser::new(username))
    }

    /// Insert a wallet with an opening balance directly into committed
    /// state. No transaction is recorded for the opening balance.
    pub fn seed_wallet(&self, user_id: UserId, currency: Currency, balance: Amount) -> Result<Wallet> {
        let mut wallet = NewWallet::new(user_id, currency);
        wallet.balance = balance;
        self.shared.state.lock().insert_wallet(&wallet)
    }

    /// Overwrite a stored balance without recording a transaction.
    pub fn set_balance(&self, wallet_id: WalletId, balance: Amount) -> Result<()> {
        let mut state = self.shared.state.lock();
        let wallet = state
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        wallet.balance = balance;
        Ok(())
    }

    pub fn wallet(&self, wallet_id: WalletId) -> Option<Wallet> {
        self.shared.state.lock().wallets.get(&wallet_id).cloned()
    }

    pub fn users(&self) -> Vec<User> {
        self.shared.state.lock().users.values().cloned().collect()
    }

    pub fn wallets(&self) -> Vec<Wallet> {
        self.shared.state.lock().wallets.values().cloned().collect()
    }

    /// Every committed transaction in insertion order.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.shared.state.lock().transactions.clone()
    }

    fn context(&self, staged: Option<MemoryState>) -> MemoryContext {
        MemoryContext {
            shared: Arc::clone(&self.shared),
            staged,
        }
    }
}

/// Execution context of the in-memory store.
///
/// Inside a unit of work it carries the unit's private copy of the state.
pub struct MemoryContext {
    shared: Arc<Shared>,
    staged: Option<MemoryState>,
}

impl MemoryContext {
    fn inject(&self, point: FaultPoint) -> Result<()> {
        self.shared.inject(point)
    }

    fn read<R>(&mut self, f: impl FnOnce(&MemoryState) -> Result<R>) -> Result<R> {
        self.shared.stats.lock().reads += 1;
        match &self.staged {
            Some(state) => f(state),
            None => f(&self.shared.state.lock()),
        }
    }

    /// Apply `f`; `f` must leave the state untouched when it fails.
    fn write<R>(&mut self, f: impl FnOnce(&mut MemoryState) -> Result<R>) -> Result<R> {
        let result = match &mut self.staged {
            Some(state) => f(state),
            None => f(&mut self.shared.state.lock()),
        };
        if result.is_ok() {
            self.shared.stats.lock().writes += 1;
        }
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitStatus {
    Open,
    Committed,
    RolledBack,
}

/// Unit of work over a private copy of the store state.
pub struct MemoryUnit {
    context: MemoryContext,
    status: UnitStatus,
    gate: Option<OwnedMutexGuard<()>>,
}

impl MemoryUnit {
    fn discard(&mut self) {
        self.context.staged = None;
        self.status = UnitStatus::RolledBack;
        self.gate = None;
        self.context.shared.stats.lock().rolled_back += 1;
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    type Context = MemoryContext;

    fn context(&mut self) -> Result<&mut MemoryContext> {
        match self.status {
            UnitStatus::Open => Ok(&mut self.context),
            UnitStatus::Committed | UnitStatus::RolledBack => Err(LedgerError::storage(
                "unit.context",
                "unit of work already finished",
            )),
        }
    }

    async fn commit(&mut self) -> Result<()> {
        match self.status {
            UnitStatus::Open => {
                if let Err(err) = self.context.inject(FaultPoint::Commit) {
                    self.discard();
                    return Err(err);
                }
                if let Some(staged) = self.context.staged.take() {
                    *self.context.shared.state.lock() = staged;
                }
                self.status = UnitStatus::Committed;
                self.gate = None;
                self.context.shared.stats.lock().commits += 1;
                Ok(())
            }
            UnitStatus::Committed => Err(LedgerError::storage(
                "unit.commit",
                "unit of work already committed",
            )),
            UnitStatus::RolledBack => Err(LedgerError::storage(
                "unit.commit",
                "unit of work already rolled back",
            )),
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        self.context.shared.stats.lock().rollback_calls += 1;
        if self.status == UnitStatus::Open {
            self.discard();
        }
        Ok(())
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        if self.status == UnitStatus::Open {
            self.context.shared.stats.lock().discarded += 1;
        }
    }
}

#[async_trait]
impl TransactionCoordinator for MemoryStore {
    type Context = MemoryContext;
    type Connection = Box<MemoryContext>;
    type Unit = MemoryUnit;

    async fn acquire(&self) -> Result<Box<MemoryContext>> {
        self.shared.inject(FaultPoint::Acquire)?;
        self.shared.stats.lock().acquires += 1;
        Ok(Box::new(self.context(None)))
    }

    async fn begin(&self) -> Result<MemoryUnit> {
        self.shared.inject(FaultPoint::Begin)?;
        let gate = Arc::clone(&self.shared.unit_gate).lock_owned().await;
        let staged = self.shared.state.lock().clone();
        self.shared.stats.lock().begins += 1;
        Ok(MemoryUnit {
            context: self.context(Some(staged)),
            status: UnitStatus::Open,
            gate: Some(gate),
        })
    }

    async fn ping(&self) -> Result<()> {
        self.shared.inject(FaultPoint::Acquire)
    }
}

#[async_trait]
impl UserGateway<MemoryContext> for MemoryStore {
    async fn create(&self, ctx: &mut MemoryContext, user: &NewUser) -> Result<User> {
        ctx.inject(FaultPoint::CreateUser)?;
        ctx.write(|state| state.insert_user(user))
    }

    async fn get_by_id(&self, ctx: &mut MemoryContext, id: UserId) -> Result<User> {
        ctx.read(|state| {
            state
                .users
                .get(&id)
                .cloned()
                .ok_or_else(|| LedgerError::UserNotFound(id.to_string()))
        })
    }

    async fn get_by_username(&self, ctx: &mut MemoryContext, username: &str) -> Result<User> {
        ctx.read(|state| {
            state
                .users
                .values()
                .find(|u| u.username == username)
                .cloned()
                .ok_or_else(|| LedgerError::UserNotFound(username.to_string()))
        })
    }
}

#[async_trait]
impl WalletGateway<MemoryContext> for MemoryStore {
    async fn create(&self, ctx: &mut MemoryContext, wallet: &NewWallet) -> Result<Wallet> {
        ctx.inject(FaultPoint::CreateWallet)?;
        ctx.write(|state| state.insert_wallet(wallet))
    }

    async fn get_by_id(&self, ctx: &mut MemoryContext, id: WalletId) -> Result<Wallet> {
        ctx.inject(FaultPoint::ReadWallet)?;
        ctx.read(|state| state.wallet(id))
    }

    async fn get_by_id_for_update(&self, ctx: &mut MemoryContext, id: WalletId) -> Result<Wallet> {
        // Units are already serialized.
        ctx.inject(FaultPoint::ReadWallet)?;
        ctx.read(|state| state.wallet(id))
    }

    async fn get_by_user_and_currency(
        &self,
        ctx: &mut MemoryContext,
        user_id: UserId,
        currency: &Currency,
    ) -> Result<Wallet> {
        ctx.read(|state| {
            state
                .wallets
                .values()
                .find(|w| w.user_id == user_id && &w.currency == currency)
                .cloned()
                .ok_or_else(|| LedgerError::NoWalletInCurrency {
                    user_id,
                    currency: currency.clone(),
                })
        })
    }

    async fn update_balance(&self, ctx: &mut MemoryContext, id: WalletId, delta: Amount) -> Result<()> {
        ctx.inject(FaultPoint::UpdateBalance)?;
        ctx.write(|state| {
            let wallet = state
                .wallets
                .get_mut(&id)
                .ok_or(LedgerError::WalletNotFound(id))?;
            let sum = wallet
                .balance
                .checked_add(delta)
                .ok_or_else(|| LedgerError::storage("wallet.update_balance", "numeric overflow"))?;
            let balance = Amount::checked(sum.as_decimal())
                .map_err(|e| LedgerError::storage("wallet.update_balance", e))?;
            wallet.balance = balance;
            wallet.updated_at = now();
            Ok(())
        })
    }
}

#[async_trait]
impl TransactionGateway<MemoryContext> for MemoryStore {
    async fn create(&self, ctx: &mut MemoryContext, entry: &NewTransaction) -> Result<Transaction> {
        ctx.inject(FaultPoint::AppendTransaction)?;
        ctx.write(|state| {
            entry.validate().map_err(|e| {
                LedgerError::storage("transaction.create", format!("check constraint violated: {}", e))
            })?;
            for side in [entry.from_wallet_id, entry.to_wallet_id].into_iter().flatten() {
                if !state.wallets.contains_key(&side) {
                    return Err(LedgerError::storage(
                        "transaction.create",
                        format!("foreign key violation: wallet {} does not exist", side),
                    ));
                }
            }
            state.last_transaction_id += 1;
            let entry = entry.persisted(TransactionId::new(state.last_transaction_id));
            state.transactions.push(entry.clone());
            Ok(entry)
        })
    }

    async fn list_by_wallet(
        &self,
        ctx: &mut MemoryContext,
        wallet_id: WalletId,
        page: PageRequest,
    ) -> Result<Page<Transaction>> {
        ctx.read(|state| {
            let mut matching: Vec<&Transaction> = state
                .transactions
                .iter()
                .filter(|entry| entry.touches(wallet_id))
                .collect();
            matching.sort_by(|a, b| {
                b.transaction_time
                    .cmp(&a.transaction_time)
                    .then_with(|| b.id.cmp(&a.id))
            });

            let total_count = matching.len() as i64;
            let items = matching
                .into_iter()
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .cloned()
                .collect();
            Ok(Page::new(items, page, total_count))
        })
    }

    async fn replay_totals(&self, ctx: &mut MemoryContext, wallet_id: WalletId) -> Result<ReplayTotals> {
        ctx.read(|state| Ok(balance::replay_totals(wallet_id, &state.transactions)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn seeded() -> (MemoryStore, Wallet) {
        let store = MemoryStore::new();
        let user = store.seed_user("alice").unwrap();
        let wallet = store
            .seed_wallet(user.id, Currency::usd(), Amount::new(dec!(100)))
            .unwrap();
        (store, wallet)
    }

    #[tokio::test]
    async fn test_commit_publishes_staged_writes() {
        let (store, wallet) = seeded();

        let mut unit = store.begin().await.unwrap();
        WalletGateway::update_balance(&store, unit.context().unwrap(), wallet.id, Amount::new(dec!(5)))
            .await
            .unwrap();
        assert_eq!(store.wallet(wallet.id).unwrap().balance, Amount::new(dec!(100)));

        unit.commit().await.unwrap();
        unit.rollback().await.unwrap();

        assert_eq!(store.wallet(wallet.id).unwrap().balance, Amount::new(dec!(105)));
        let stats = store.stats();
        assert_eq!((stats.begins, stats.commits, stats.rolled_back), (1, 1, 0));
        assert_eq!(stats.rollback_calls, 1);
    }

    #[tokio::test]
    async fn test_dropped_unit_leaves_no_trace() {
        let (store, wallet) = seeded();

        {
            let mut unit = store.begin().await.unwrap();
            WalletGateway::update_balance(&store, unit.context().unwrap(), wallet.id, Amount::new(dec!(-40)))
                .await
                .unwrap();
        }

        assert_eq!(store.wallet(wallet.id).unwrap().balance, Amount::new(dec!(100)));
        assert_eq!(store.stats().discarded, 1);

        // The gate is released, so a new unit can start.
        let mut unit = store.begin().await.unwrap();
        unit.rollback().await.unwrap();
        unit.rollback().await.unwrap();
        assert!(unit.context().is_err());
        assert_eq!(store.stats().rolled_back, 1);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let (store, wallet) = seeded();
        store.fail_nth(FaultPoint::UpdateBalance, 2);

        let mut conn = store.acquire().await.unwrap();
        assert!(WalletGateway::update_balance(&store, &mut *conn, wallet.id, Amount::from_units(1))
            .await
            .is_ok());
        let err = WalletGateway::update_balance(&store, &mut *conn, wallet.id, Amount::from_units(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage { .. }));
        assert!(WalletGateway::update_balance(&store, &mut *conn, wallet.id, Amount::from_units(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_failed_commit_discards() {
        let (store, wallet) = seeded();
        store.fail_next(FaultPoint::Commit);

        let mut unit = store.begin().await.unwrap();
        WalletGateway::update_balance(&store, unit.context().unwrap(), wallet.id, Amount::from_units(1))
            .await
            .unwrap();
        assert!(unit.commit().await.is_err());

        assert_eq!(store.wallet(wallet.id).unwrap().balance, Amount::new(dec!(100)));
        assert_eq!(store.stats().rolled_back, 1);
    }

    #[tokio::test]
    async fn test_store_constraints() {
        let (store, wallet) = seeded();
        let mut conn = store.acquire().await.unwrap();

        let dup = UserGateway::create(&store, &mut *conn, &NewUser::new("alice")).await;
        assert!(matches!(dup, Err(LedgerError::AlreadyExists(_))));

        let second = WalletGateway::create(&store, &mut *conn, &NewWallet::new(wallet.user_id, Currency::usd())).await;
        assert!(matches!(second, Err(LedgerError::AlreadyExists(_))));

        let orphan = WalletGateway::create(&store, &mut *conn, &NewWallet::new(UserId::new(99), Currency::usd())).await;
        assert!(matches!(orphan, Err(LedgerError::Storage { .. })));

        let missing = WalletGateway::update_balance(&store, &mut *conn, WalletId::new(99), Amount::from_units(1)).await;
        assert!(matches!(missing, Err(LedgerError::WalletNotFound(_))));

        let dangling = NewTransaction::deposit(WalletId::new(99), Amount::from_units(1), Currency::usd());
        assert!(TransactionGateway::create(&store, &mut *conn, &dangling).await.is_err());
        assert!(store.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_balance_overflow_is_an_error() {
        let (store, wallet) = seeded();
        let mut conn = store.acquire().await.unwrap();

        let huge = Amount::new(rust_decimal::Decimal::MAX);
        let err = WalletGateway::update_balance(&store, &mut *conn, wallet.id, huge)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage { .. }));
        assert_eq!(store.wallet(wallet.id).unwrap().balance, Amount::new(dec!(100)));
    }

    #[tokio::test]
    async fn test_history_order_and_count() {
        let (store, wallet) = seeded();
        let mut conn = store.acquire().await.unwrap();

        for units in 1..=3 {
            let entry = NewTransaction::deposit(wallet.id, Amount::from_units(units), Currency::usd());
            TransactionGateway::create(&store, &mut *conn, &entry).await.unwrap();
        }

        let page = TransactionGateway::list_by_wallet(
            &store,
            &mut *conn,
            wallet.id,
            PageRequest { limit: 2, offset: 0 },
        )
        .await
        .unwrap();

        assert_eq!(page.total_count, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].id > page.items[1].id);
    }
}
