use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::Row;
use walletd_common::{LedgerError, Result, UserId};

use super::{is_unique_violation, storage};
use crate::gateway::UserGateway;
use crate::user::{NewUser, User};

const SELECT_USER: &str = "SELECT id, username, created_at, updated_at FROM users";

/// Users table.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgUserGateway;

fn user_from_row(row: &PgRow) -> Result<User> {
    let decode = storage("user.decode");
    Ok(User {
        id: UserId::new(row.try_get("id").map_err(decode)?),
        username: row.try_get("username").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

#[async_trait]
impl UserGateway<PgConnection> for PgUserGateway {
    async fn create(&self, ctx: &mut PgConnection, user: &NewUser) -> Result<User> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO users (username, created_at, updated_at)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(&user.username)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&mut *ctx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::AlreadyExists(format!("username {}", user.username))
            } else {
                LedgerError::storage("user.create", e)
            }
        })?;

        Ok(user.persisted(UserId::new(id)))
    }

    async fn get_by_id(&self, ctx: &mut PgConnection, id: UserId) -> Result<User> {
        let row = sqlx::query(&format!("{} WHERE id = $1", SELECT_USER))
            .bind(id.get())
            .fetch_optional(&mut *ctx)
            .await
            .map_err(storage("user.get_by_id"))?;

        match row {
            Some(row) => user_from_row(&row),
            None => Err(LedgerError::UserNotFound(id.to_string())),
        }
    }

    async fn get_by_username(&self, ctx: &mut PgConnection, username: &str) -> Result<User> {
        let row = sqlx::query(&format!("{} WHERE username = $1", SELECT_USER))
            .bind(username)
            .fetch_optional(&mut *ctx)
            .await
            .map_err(storage("user.get_by_username"))?;

        match row {
            Some(row) => user_from_row(&row),
            None => Err(LedgerError::UserNotFound(username.to_string())),
        }
    }
}
