use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::Row;
use walletd_common::{Amount, Currency, Result, TransactionId, WalletId};

use super::storage;
use crate::balance::ReplayTotals;
use crate::gateway::TransactionGateway;
use crate::page::{Page, PageRequest};
use crate::transaction::{NewTransaction, Transaction};

/// Transactions table.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgTransactionGateway;

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let decode = storage("transaction.decode");
    let from_wallet_id: Option<i64> = row.try_get("from_wallet_id").map_err(decode)?;
    let to_wallet_id: Option<i64> = row.try_get("to_wallet_id").map_err(decode)?;
    let amount: Decimal = row.try_get("amount").map_err(decode)?;
    let currency: String = row.try_get("currency").map_err(decode)?;
    let kind: String = row.try_get("type").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;

    Ok(Transaction {
        id: TransactionId::new(row.try_get("id").map_err(decode)?),
        from_wallet_id: from_wallet_id.map(WalletId::new),
        to_wallet_id: to_wallet_id.map(WalletId::new),
        amount: Amount::new(amount),
        currency: Currency::new(currency),
        kind: kind.parse()?,
        status: status.parse()?,
        transaction_time: row.try_get("transaction_time").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

#[async_trait]
impl TransactionGateway<PgConnection> for PgTransactionGateway {
    async fn create(&self, ctx: &mut PgConnection, entry: &NewTransaction) -> Result<Transaction> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO transactions (
                from_wallet_id, to_wallet_id, amount, currency,
                type, status, transaction_time, description, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(entry.from_wallet_id.map(|id| id.get()))
        .bind(entry.to_wallet_id.map(|id| id.get()))
        .bind(entry.amount.as_decimal())
        .bind(entry.currency.code())
        .bind(entry.kind.as_str())
        .bind(entry.status.as_str())
        .bind(entry.transaction_time)
        .bind(entry.description.as_deref())
        .bind(entry.created_at)
        .fetch_one(&mut *ctx)
        .await
        .map_err(storage("transaction.create"))?;

        Ok(entry.persisted(TransactionId::new(id)))
    }

    async fn list_by_wallet(
        &self,
        ctx: &mut PgConnection,
        wallet_id: WalletId,
        page: PageRequest,
    ) -> Result<Page<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, from_wallet_id, to_wallet_id, amount, currency,
                   type, status, transaction_time, description, created_at
            FROM transactions
            WHERE from_wallet_id = $1 OR to_wallet_id = $1
            ORDER BY transaction_time DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(wallet_id.get())
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *ctx)
        .await
        .map_err(storage("transaction.list_by_wallet"))?;

        let total_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM transactions
            WHERE from_wallet_id = $1 OR to_wallet_id = $1
            "#,
        )
        .bind(wallet_id.get())
        .fetch_one(&mut *ctx)
        .await
        .map_err(storage("transaction.count_by_wallet"))?;

        let items = rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page::new(items, page, total_count))
    }

    async fn replay_totals(&self, ctx: &mut PgConnection, wallet_id: WalletId) -> Result<ReplayTotals> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN to_wallet_id = $1 THEN amount ELSE 0 END), 0) AS credited,
                COALESCE(SUM(CASE WHEN from_wallet_id = $1 THEN amount ELSE 0 END), 0) AS debited,
                COUNT(*) AS entries
            FROM transactions
            WHERE from_wallet_id = $1 OR to_wallet_id = $1
            "#,
        )
        .bind(wallet_id.get())
        .fetch_one(&mut *ctx)
        .await
        .map_err(storage("transaction.replay_totals"))?;

        let decode = storage("transaction.replay_totals");
        let credited: Decimal = row.try_get("credited").map_err(decode)?;
        let debited: Decimal = row.try_get("debited").map_err(decode)?;
        let entries: i64 = row.try_get("entries").map_err(decode)?;

        Ok(ReplayTotals {
            credited: Amount::new(credited),
            debited: Amount::new(debited),
            entries: entries.max(0) as u64,
        })
    }
}
