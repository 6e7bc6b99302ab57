//! Persistence gateways.
//!
//! Every gateway is generic over the execution context `C` it runs
//! against, and every method takes that context explicitly. The same
//! gateway can therefore serve a plain pooled connection or an open unit
//! of work. Gateways hold no state between calls.
//!
//! Absent rows are reported as not-found errors, never as storage
//! failures.

use async_trait::async_trait;
use walletd_common::{Amount, Currency, Result, UserId, WalletId};

use crate::balance::ReplayTotals;
use crate::page::{Page, PageRequest};
use crate::transaction::{NewTransaction, Transaction};
use crate::user::{NewUser, User};
use crate::wallet::{NewWallet, Wallet};

/// Access to user records.
#[async_trait]
pub trait UserGateway<C: Send>: Send + Sync {
    /// Insert a user. A taken username yields `AlreadyExists`.
    async fn create(&self, ctx: &mut C, user: &NewUser) -> Result<User>;

    async fn get_by_id(&self, ctx: &mut C, id: UserId) -> Result<User>;

    async fn get_by_username(&self, ctx: &mut C, username: &str) -> Result<User>;
}

/// Access to wallet records.
#[async_trait]
pub trait WalletGateway<C: Send>: Send + Sync {
    /// Insert a wallet. A second wallet for the same user and currency
    /// yields `AlreadyExists`.
    async fn create(&self, ctx: &mut C, wallet: &NewWallet) -> Result<Wallet>;

    async fn get_by_id(&self, ctx: &mut C, id: WalletId) -> Result<Wallet>;

    /// Read a wallet and hold it against concurrent writers until the
    /// enclosing unit of work finishes.
    async fn get_by_id_for_update(&self, ctx: &mut C, id: WalletId) -> Result<Wallet>;

    async fn get_by_user_and_currency(
        &self,
        ctx: &mut C,
        user_id: UserId,
        currency: &Currency,
    ) -> Result<Wallet>;

    /// Add `delta` to the stored balance in a single store-side statement.
    ///
    /// No row affected yields `WalletNotFound`.
    async fn update_balance(&self, ctx: &mut C, id: WalletId, delta: Amount) -> Result<()>;
}

/// Access to the transaction log.
#[async_trait]
pub trait TransactionGateway<C: Send>: Send + Sync {
    /// Append an entry.
    async fn create(&self, ctx: &mut C, entry: &NewTransaction) -> Result<Transaction>;

    /// Entries touching `wallet_id`, newest first (`transaction_time DESC,
    /// id DESC`), with the total number of matching entries.
    async fn list_by_wallet(
        &self,
        ctx: &mut C,
        wallet_id: WalletId,
        page: PageRequest,
    ) -> Result<Page<Transaction>>;

    /// Credit and debit sums over the wallet's full history.
    async fn replay_totals(&self, ctx: &mut C, wallet_id: WalletId) -> Result<ReplayTotals>;
}
