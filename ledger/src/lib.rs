//! walletd Ledger Engine
//!
//! Transactional balance mutation with an append-only transaction log.
//! Storage is reached through gateway traits over an execution context,
//! with PostgreSQL and in-memory implementations.

pub mod balance;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod gateway;
pub mod memory;
pub mod page;
pub mod postgres;
pub mod transaction;
pub mod user;
pub mod wallet;

pub use balance::{replay_balance, ReplayTotals, Reconciliation};
pub use config::EngineConfig;
pub use coordinator::{TransactionCoordinator, UnitOfWork};
pub use engine::{LedgerEngine, LedgerService, MemoryLedgerEngine, PgLedgerEngine, TransferOutcome};
pub use gateway::{TransactionGateway, UserGateway, WalletGateway};
pub use memory::{FaultPoint, MemoryStats, MemoryStore};
pub use page::{Page, PageRequest};
pub use transaction::{NewTransaction, Transaction, TransactionStatus, TransactionType};
pub use user::{NewUser, User};
pub use wallet::{NewWallet, Wallet};
