//! Test fixtures for creating test data.

use anyhow::Result;
use chrono::{DateTime, Utc};
use creditworks_core::auth::password;
use creditworks_core::jobs::model::JobStatus;
use creditworks_core::ledger;
use sqlx::PgPool;
use uuid::Uuid;

/// Inserts a user with a real pbkdf2 hash of `password`, active by default.
pub async fn create_test_user(pool: &PgPool, email: &str, password_plain: &str) -> Result<Uuid> {
    let hash = password::hash(password_plain);
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (id, email, password_hash) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(&hash)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Tops up `user_id` by `credits` through the real ledger entry point, so
/// the seeded balance carries a normal `topup` row rather than a backdoor
/// insert.
pub async fn seed_balance(pool: &PgPool, user_id: Uuid, credits: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    let key = format!("fixture:{}:{}", user_id, Uuid::new_v4());
    ledger::apply_topup(&mut tx, user_id, credits, "fixture", &key, &key).await?;
    tx.commit().await?;
    Ok(())
}

/// Places a hold for `job_id` through the real ledger entry point, mirroring
/// what `POST /api/jobs` does before inserting the job row.
pub async fn place_hold_for_job(pool: &PgPool, user_id: Uuid, job_id: Uuid, credits_cost: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    ledger::place_hold(&mut tx, user_id, job_id, credits_cost).await?;
    tx.commit().await?;
    Ok(())
}

/// Inserts a job directly in `running` state under a caller-chosen id and
/// `updated_at`, for exercising the worker's stale-recovery pass without
/// waiting out the real clock. Pair with [`place_hold_for_job`] first so the
/// ledger accounting matches a job the worker actually claimed.
pub async fn seed_running_job(
    pool: &PgPool,
    job_id: Uuid,
    user_id: Uuid,
    credits_cost: i64,
    max_attempts: i32,
    attempt_count: i32,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO jobs (id, user_id, provider, operation, input, status, attempt_count,
            max_attempts, credits_cost, available_at, started_at, created_at, updated_at)
        VALUES ($1, $2, 'mock', 'noop', '{}'::jsonb, $3, $4, $5, $6, NOW(), NOW(), NOW(), $7)
        "#,
    )
    .bind(job_id)
    .bind(user_id)
    .bind(JobStatus::Running)
    .bind(attempt_count)
    .bind(max_attempts)
    .bind(credits_cost)
    .bind(updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn ledger_balance(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    use creditworks_core::store::ledger as ledger_store;
    Ok(ledger_store::balance_unlocked(pool, user_id).await?)
}
