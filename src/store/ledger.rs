use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(FromRow, Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub entry_type: String,
    pub amount_signed: i64,
    pub balance_after: i64,
    pub source_type: String,
    pub source_id: String,
    pub idempotency_key: String,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Sum of `amount_signed` for the user. Caller must already hold the user
/// row lock if this is read as part of a balance-dependent write.
pub async fn balance(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> Result<i64, sqlx::Error> {
    let sum: Option<i64> =
        sqlx::query_scalar("SELECT SUM(amount_signed) FROM credit_ledger WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut **tx)
            .await?;
    Ok(sum.unwrap_or(0))
}

/// Read-only balance for display endpoints; does not take the user lock.
pub async fn balance_unlocked(pool: &PgPool, user_id: Uuid) -> Result<i64, sqlx::Error> {
    let sum: Option<i64> =
        sqlx::query_scalar("SELECT SUM(amount_signed) FROM credit_ledger WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await?;
    Ok(sum.unwrap_or(0))
}

pub async fn list_for_user(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
) -> Result<Vec<LedgerEntry>, sqlx::Error> {
    sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT id, user_id, entry_type, amount_signed, balance_after, source_type,
               source_id, idempotency_key, meta, created_at
        FROM credit_ledger
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Inserts an entry under the idempotency key. Returns `None` (no row
/// created) on conflict, so callers can report `applied=false`.
#[allow(clippy::too_many_arguments)]
pub async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    entry_type: &str,
    amount_signed: i64,
    balance_after: i64,
    source_type: &str,
    source_id: &str,
    idempotency_key: &str,
    meta: serde_json::Value,
) -> Result<Option<LedgerEntry>, sqlx::Error> {
    sqlx::query_as::<_, LedgerEntry>(
        r#"
        INSERT INTO credit_ledger
            (id, user_id, entry_type, amount_signed, balance_after, source_type, source_id, idempotency_key, meta)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (idempotency_key) DO NOTHING
        RETURNING id, user_id, entry_type, amount_signed, balance_after, source_type,
                  source_id, idempotency_key, meta, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(entry_type)
    .bind(amount_signed)
    .bind(balance_after)
    .bind(source_type)
    .bind(source_id)
    .bind(idempotency_key)
    .bind(meta)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn find_by_idempotency_key(
    pool: &PgPool,
    idempotency_key: &str,
) -> Result<Option<LedgerEntry>, sqlx::Error> {
    sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT id, user_id, entry_type, amount_signed, balance_after, source_type,
               source_id, idempotency_key, meta, created_at
        FROM credit_ledger
        WHERE idempotency_key = $1
        "#,
    )
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await
}

pub async fn sum_for_source(
    pool: &PgPool,
    source_type: &str,
    source_id: &str,
) -> Result<i64, sqlx::Error> {
    let sum: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(amount_signed) FROM credit_ledger WHERE source_type = $1 AND source_id = $2",
    )
    .bind(source_type)
    .bind(source_id)
    .fetch_one(pool)
    .await?;
    Ok(sum.unwrap_or(0))
}
