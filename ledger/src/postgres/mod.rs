//! PostgreSQL adapters.
//!
//! All gateways run against `PgConnection`. A pooled connection and an
//! open `sqlx::Transaction` both dereference to one, so the same query
//! code serves plain reads and units of work.

mod transactions;
mod users;
mod wallets;

pub use transactions::PgTransactionGateway;
pub use users::PgUserGateway;
pub use wallets::PgWalletGateway;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Postgres, Transaction};
use tracing::debug;
use walletd_common::{LedgerError, Result};

use crate::coordinator::{TransactionCoordinator, UnitOfWork};

/// Apply the bundled schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| LedgerError::storage("migrate", e))
}

/// Check if the error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

/// Error mapper tagging sqlx failures with the gateway operation.
pub(crate) fn storage(operation: &'static str) -> impl Fn(sqlx::Error) -> LedgerError + Copy {
    move |err| LedgerError::storage(operation, err)
}

/// Hands out pooled connections and database transactions.
#[derive(Debug, Clone)]
pub struct PgCoordinator {
    pool: PgPool,
}

impl PgCoordinator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionCoordinator for PgCoordinator {
    type Context = PgConnection;
    type Connection = PoolConnection<Postgres>;
    type Unit = PgUnitOfWork;

    async fn acquire(&self) -> Result<PoolConnection<Postgres>> {
        self.pool.acquire().await.map_err(storage("pool.acquire"))
    }

    async fn begin(&self) -> Result<PgUnitOfWork> {
        let tx = self.pool.begin().await.map_err(storage("unit.begin"))?;
        Ok(PgUnitOfWork {
            state: UnitState::Open(tx),
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage("ping"))?;
        Ok(())
    }
}

enum UnitState {
    Open(Transaction<'static, Postgres>),
    Committed,
    RolledBack,
}

/// A database transaction.
///
/// Dropping it while still open rolls the transaction back.
pub struct PgUnitOfWork {
    state: UnitState,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    type Context = PgConnection;

    fn context(&mut self) -> Result<&mut PgConnection> {
        match &mut self.state {
            UnitState::Open(tx) => Ok(&mut **tx),
            UnitState::Committed | UnitState::RolledBack => Err(LedgerError::storage(
                "unit.context",
                "unit of work already finished",
            )),
        }
    }

    async fn commit(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, UnitState::RolledBack) {
            UnitState::Open(tx) => {
                tx.commit().await.map_err(storage("unit.commit"))?;
                self.state = UnitState::Committed;
                Ok(())
            }
            UnitState::Committed => {
                self.state = UnitState::Committed;
                Err(LedgerError::storage("unit.commit", "unit of work already committed"))
            }
            UnitState::RolledBack => Err(LedgerError::storage(
                "unit.commit",
                "unit of work already rolled back",
            )),
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, UnitState::RolledBack) {
            UnitState::Open(tx) => tx.rollback().await.map_err(storage("unit.rollback")),
            UnitState::Committed => {
                self.state = UnitState::Committed;
                debug!("Rollback after commit ignored");
                Ok(())
            }
            UnitState::RolledBack => Ok(()),
        }
    }
}
