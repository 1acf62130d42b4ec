//! Operational metrics and readiness checks. No external metrics backend:
//! these are plain aggregation queries exposed as JSON from the ops routes,
//! matching the rest of the system's "small store queries, thin service
//! layer" shape rather than wiring in a Prometheus exporter.

use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::common::error::AppError;
use crate::common::state::AppState;
use crate::store::jobs as jobs_store;
use crate::store::webhooks as webhooks_store;

const HEARTBEAT_MAX_AGE_SECONDS: i64 = 30;
const METRICS_WINDOW_HOURS: i64 = 24;

#[derive(Serialize)]
pub struct Readiness {
    pub ok: bool,
    pub db_ok: bool,
    pub heartbeat_age_seconds: i64,
}

/// Ready when the database answers a trivial query and the worker has
/// polled within the last 30 seconds.
pub async fn readiness(pool: &PgPool, state: &AppState) -> Readiness {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await.is_ok();
    let heartbeat_age_seconds = state.heartbeat_age_seconds();
    Readiness {
        ok: db_ok && heartbeat_age_seconds <= HEARTBEAT_MAX_AGE_SECONDS,
        db_ok,
        heartbeat_age_seconds,
    }
}

#[derive(Serialize)]
pub struct QueueDepth {
    pub status: String,
    pub count: i64,
}

#[derive(Serialize)]
pub struct Metrics {
    pub queue_depth: Vec<QueueDepth>,
    pub jobs_failed_24h: i64,
    pub dead_letters_24h: i64,
    pub job_duration_p95_ms_24h: Option<f64>,
    pub webhook_failures_24h: i64,
    pub heartbeat_age_seconds: i64,
}

pub async fn metrics(pool: &PgPool, state: &AppState) -> Result<Metrics, AppError> {
    let since = Utc::now() - Duration::hours(METRICS_WINDOW_HOURS);

    let queue_depth = jobs_store::queue_depth_by_status(pool)
        .await
        .map_err(AppError::Database)?
        .into_iter()
        .map(|(status, count)| QueueDepth { status: format!("{status:?}").to_lowercase(), count })
        .collect();

    Ok(Metrics {
        queue_depth,
        jobs_failed_24h: jobs_store::failed_count_since(pool, since).await.map_err(AppError::Database)?,
        dead_letters_24h: jobs_store::dead_letter_count_since(pool, since)
            .await
            .map_err(AppError::Database)?,
        job_duration_p95_ms_24h: jobs_store::duration_p95_ms_since(pool, since)
            .await
            .map_err(AppError::Database)?,
        webhook_failures_24h: webhooks_store::count_failed_since(pool, since)
            .await
            .map_err(AppError::Database)?,
        heartbeat_age_seconds: state.heartbeat_age_seconds(),
    })
}
