use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::Row;
use walletd_common::{now, Amount, Currency, LedgerError, Result, UserId, WalletId};

use super::{is_unique_violation, storage};
use crate::gateway::WalletGateway;
use crate::wallet::{NewWallet, Wallet};

const SELECT_BY_ID: &str = r#"
    SELECT id, user_id, currency, balance, created_at, updated_at
    FROM wallets
    WHERE id = $1
"#;

const SELECT_BY_ID_FOR_UPDATE: &str = r#"
    SELECT id, user_id, currency, balance, created_at, updated_at
    FROM wallets
    WHERE id = $1
    FOR UPDATE
"#;

const SELECT_BY_USER_AND_CURRENCY: &str = r#"
    SELECT id, user_id, currency, balance, created_at, updated_at
    FROM wallets
    WHERE user_id = $1 AND currency = $2
"#;

/// Wallets table.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgWalletGateway;

fn wallet_from_row(row: &PgRow) -> Result<Wallet> {
    let decode = storage("wallet.decode");
    let currency: String = row.try_get("currency").map_err(decode)?;
    let balance: Decimal = row.try_get("balance").map_err(decode)?;
    Ok(Wallet {
        id: WalletId::new(row.try_get("id").map_err(decode)?),
        user_id: UserId::new(row.try_get("user_id").map_err(decode)?),
        currency: Currency::new(currency),
        balance: Amount::new(balance),
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

async fn fetch_wallet(
    ctx: &mut PgConnection,
    sql: &'static str,
    id: WalletId,
    operation: &'static str,
) -> Result<Wallet> {
    let row = sqlx::query(sql)
        .bind(id.get())
        .fetch_optional(&mut *ctx)
        .await
        .map_err(storage(operation))?;

    match row {
        Some(row) => wallet_from_row(&row),
        None => Err(LedgerError::WalletNotFound(id)),
    }
}

#[async_trait]
impl WalletGateway<PgConnection> for PgWalletGateway {
    async fn create(&self, ctx: &mut PgConnection, wallet: &NewWallet) -> Result<Wallet> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO wallets (user_id, currency, balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(wallet.user_id.get())
        .bind(wallet.currency.code())
        .bind(wallet.balance.as_decimal())
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .fetch_one(&mut *ctx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::AlreadyExists(format!(
                    "{} wallet for user {}",
                    wallet.currency, wallet.user_id
                ))
            } else {
                LedgerError::storage("wallet.create", e)
            }
        })?;

        Ok(wallet.persisted(WalletId::new(id)))
    }

    async fn get_by_id(&self, ctx: &mut PgConnection, id: WalletId) -> Result<Wallet> {
        fetch_wallet(ctx, SELECT_BY_ID, id, "wallet.get_by_id").await
    }

    async fn get_by_id_for_update(&self, ctx: &mut PgConnection, id: WalletId) -> Result<Wallet> {
        fetch_wallet(ctx, SELECT_BY_ID_FOR_UPDATE, id, "wallet.get_by_id_for_update").await
    }

    async fn get_by_user_and_currency(
        &self,
        ctx: &mut PgConnection,
        user_id: UserId,
        currency: &Currency,
    ) -> Result<Wallet> {
        let row = sqlx::query(SELECT_BY_USER_AND_CURRENCY)
            .bind(user_id.get())
            .bind(currency.code())
            .fetch_optional(&mut *ctx)
            .await
            .map_err(storage("wallet.get_by_user_and_currency"))?;

        match row {
            Some(row) => wallet_from_row(&row),
            None => Err(LedgerError::NoWalletInCurrency {
                user_id,
                currency: currency.clone(),
            }),
        }
    }

    async fn update_balance(&self, ctx: &mut PgConnection, id: WalletId, delta: Amount) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = balance + $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(delta.as_decimal())
        .bind(now())
        .bind(id.get())
        .execute(&mut *ctx)
        .await
        .map_err(storage("wallet.update_balance"))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::WalletNotFound(id));
        }
        Ok(())
    }
}
