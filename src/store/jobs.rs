use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::jobs::model::{Job, JobEvent, JobEventType, JobStatus};

const JOB_COLUMNS: &str = "id, user_id, provider, operation, input, status, attempt_count, \
    max_attempts, credits_cost, available_at, started_at, finished_at, provider_job_id, \
    result, last_error, idempotency_key, created_at, updated_at";

pub async fn insert(tx: &mut Transaction<'_, Postgres>, job: &Job) -> Result<Job, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        r#"
        INSERT INTO jobs (id, user_id, provider, operation, input, status, attempt_count,
            max_attempts, credits_cost, available_at, idempotency_key, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job.id)
    .bind(job.user_id)
    .bind(&job.provider)
    .bind(&job.operation)
    .bind(&job.input)
    .bind(job.status)
    .bind(job.attempt_count)
    .bind(job.max_attempts)
    .bind(job.credits_cost)
    .bind(job.available_at)
    .bind(&job.idempotency_key)
    .bind(job.created_at)
    .bind(job.updated_at)
    .fetch_one(&mut **tx)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Looks up a prior job by `(user_id, idempotency_key)` for request replay.
pub async fn find_by_idempotency_key(
    pool: &PgPool,
    user_id: Uuid,
    idempotency_key: &str,
) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE user_id = $1 AND idempotency_key = $2"
    ))
    .bind(user_id)
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await
}

pub async fn list_for_user(pool: &PgPool, user_id: Uuid, limit: i64) -> Result<Vec<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2"
    ))
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Claims at most one queued, due job and marks it `running`. Returns `None`
/// when nothing is claimable.
pub async fn claim_next(tx: &mut Transaction<'_, Postgres>) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        r#"
        WITH next_job AS (
            SELECT id FROM jobs
            WHERE status = 'queued' AND available_at <= NOW()
            ORDER BY available_at, created_at
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        UPDATE jobs
        SET status = 'running',
            attempt_count = attempt_count + 1,
            started_at = COALESCE(started_at, NOW()),
            updated_at = NOW()
        WHERE id IN (SELECT id FROM next_job)
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .fetch_optional(&mut **tx)
    .await
}

/// Locks a job row for settlement, asserting it is currently `running`.
pub async fn lock_running(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 AND status = 'running' FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

/// Locks any job row regardless of status, for stale-recovery.
pub async fn lock_any(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn mark_succeeded(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    provider_job_id: Option<&str>,
    result: &serde_json::Value,
) -> Result<Job, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        r#"
        UPDATE jobs
        SET status = 'succeeded', provider_job_id = $2, result = $3,
            finished_at = NOW(), updated_at = NOW()
        WHERE id = $1
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(provider_job_id)
    .bind(result)
    .fetch_one(&mut **tx)
    .await
}

pub async fn mark_queued_for_retry(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    available_at: DateTime<Utc>,
    last_error: &str,
) -> Result<Job, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        r#"
        UPDATE jobs
        SET status = 'queued', available_at = $2, last_error = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(available_at)
    .bind(last_error)
    .fetch_one(&mut **tx)
    .await
}

pub async fn mark_failed(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    last_error: &str,
) -> Result<Job, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        r#"
        UPDATE jobs
        SET status = 'failed', last_error = $2, finished_at = NOW(), updated_at = NOW()
        WHERE id = $1
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(last_error)
    .fetch_one(&mut **tx)
    .await
}

pub async fn find_stale_running(pool: &PgPool, stale_seconds: i64) -> Result<Vec<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        r#"
        SELECT {JOB_COLUMNS} FROM jobs
        WHERE status = 'running' AND updated_at < NOW() - ($1 || ' seconds')::INTERVAL
        "#
    ))
    .bind(stale_seconds.to_string())
    .fetch_all(pool)
    .await
}

pub async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    job_id: Uuid,
    event_type: JobEventType,
    payload: serde_json::Value,
) -> Result<JobEvent, sqlx::Error> {
    sqlx::query_as::<_, JobEvent>(
        r#"
        INSERT INTO job_events (id, job_id, event_type, payload)
        VALUES ($1, $2, $3, $4)
        RETURNING id, job_id, event_type, payload, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(job_id)
    .bind(event_type)
    .bind(payload)
    .fetch_one(&mut **tx)
    .await
}

pub async fn list_events(pool: &PgPool, job_id: Uuid) -> Result<Vec<JobEvent>, sqlx::Error> {
    sqlx::query_as::<_, JobEvent>(
        "SELECT id, job_id, event_type, payload, created_at FROM job_events WHERE job_id = $1 ORDER BY created_at",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await
}

/// Inserts the dead-letter row at most once per job.
pub async fn insert_dead_letter(
    tx: &mut Transaction<'_, Postgres>,
    job_id: Uuid,
    user_id: Uuid,
    reason: &str,
    payload: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO dead_letters (id, job_id, user_id, reason, payload)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (job_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(job_id)
    .bind(user_id)
    .bind(reason)
    .bind(payload)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn list_dead_letters(pool: &PgPool, limit: i64) -> Result<Vec<(Uuid, Uuid, Uuid, String)>, sqlx::Error> {
    let rows: Vec<(Uuid, Uuid, Uuid, String)> = sqlx::query_as(
        "SELECT id, job_id, user_id, reason FROM dead_letters ORDER BY created_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn queue_depth_by_status(pool: &PgPool) -> Result<Vec<(JobStatus, i64)>, sqlx::Error> {
    sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
        .fetch_all(pool)
        .await
}

pub async fn failed_count_since(pool: &PgPool, since: DateTime<Utc>) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'failed' AND finished_at >= $1")
        .bind(since)
        .fetch_one(pool)
        .await
}

pub async fn dead_letter_count_since(pool: &PgPool, since: DateTime<Utc>) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters WHERE created_at >= $1")
        .bind(since)
        .fetch_one(pool)
        .await
}

/// p95 job duration in milliseconds over completed jobs since `since`.
pub async fn duration_p95_ms_since(pool: &PgPool, since: DateTime<Utc>) -> Result<Option<f64>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT PERCENTILE_CONT(0.95) WITHIN GROUP (
            ORDER BY EXTRACT(EPOCH FROM (finished_at - started_at)) * 1000
        )
        FROM jobs
        WHERE status = 'succeeded' AND started_at IS NOT NULL AND finished_at IS NOT NULL
          AND finished_at >= $1
        "#,
    )
    .bind(since)
    .fetch_one(pool)
    .await
}
