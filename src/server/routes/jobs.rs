use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::common::error::AppError;
use crate::common::state::AppState;
use crate::jobs::model::{Job, JobEvent, JobEventType};
use crate::ledger;
use crate::server::middleware::session_auth::AuthUser;
use crate::store::jobs as jobs_store;

const MIN_MAX_ATTEMPTS: i32 = 1;
const MAX_MAX_ATTEMPTS: i32 = 20;

#[derive(Deserialize)]
pub struct CreateJobRequest {
    provider: String,
    operation: String,
    input: serde_json::Value,
    credits_cost: i64,
    #[serde(default)]
    max_attempts: Option<i32>,
}

/// Locks the user row, places a hold for the job's cost, and inserts the
/// job `queued`. The hold and the job insert share a transaction so a
/// crash between them never leaves a dangling hold.
#[derive(Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    job: Job,
    idempotent_replay: bool,
}

pub async fn create_job(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<CreateJobRequest>,
) -> Result<Json<JobResponse>, AppError> {
    if body.credits_cost <= 0 {
        return Err(AppError::Validation("credits_cost must be positive".into()));
    }
    let max_attempts = body.max_attempts.unwrap_or(3);
    if !(MIN_MAX_ATTEMPTS..=MAX_MAX_ATTEMPTS).contains(&max_attempts) {
        return Err(AppError::Validation(format!(
            "max_attempts must be between {MIN_MAX_ATTEMPTS} and {MAX_MAX_ATTEMPTS}"
        )));
    }

    let idempotency_key = headers.get("idempotency-key").and_then(|v| v.to_str().ok());

    if let Some(key) = idempotency_key {
        if let Some(existing) = jobs_store::find_by_idempotency_key(&state.db, user.user_id, key)
            .await
            .map_err(AppError::Database)?
        {
            return Ok(Json(JobResponse { job: existing, idempotent_replay: true }));
        }
    }

    let mut job = Job::builder()
        .user_id(user.user_id)
        .provider(body.provider)
        .operation(body.operation)
        .input(body.input)
        .credits_cost(body.credits_cost)
        .max_attempts(max_attempts)
        .build();
    job.idempotency_key = idempotency_key.map(str::to_string);

    let mut tx = state.db.begin().await.map_err(AppError::Database)?;
    ledger::place_hold(&mut tx, user.user_id, job.id, job.credits_cost).await?;
    let job = jobs_store::insert(&mut tx, &job).await.map_err(AppError::Database)?;
    jobs_store::insert_event(&mut tx, job.id, JobEventType::Queued, json!({})).await.map_err(AppError::Database)?;
    tx.commit().await.map_err(AppError::Database)?;

    Ok(Json(JobResponse { job, idempotent_replay: false }))
}

#[derive(Serialize)]
pub struct JobWithEvents {
    #[serde(flatten)]
    job: Job,
    events: Vec<JobEvent>,
}

pub async fn get_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobWithEvents>, AppError> {
    let job = jobs_store::find_by_id(&state.db, job_id).await.map_err(AppError::Database)?;
    let job = match job {
        Some(job) if job.user_id == user.user_id => job,
        Some(_) => return Err(AppError::Forbidden("job belongs to another user".into())),
        None => return Err(AppError::NotFound("job".into())),
    };
    let events = jobs_store::list_events(&state.db, job.id).await.map_err(AppError::Database)?;
    Ok(Json(JobWithEvents { job, events }))
}

const LIST_PAGE_SIZE: i64 = 100;

pub async fn list_jobs(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Job>>, AppError> {
    let jobs = jobs_store::list_for_user(&state.db, user.user_id, LIST_PAGE_SIZE)
        .await
        .map_err(AppError::Database)?;
    Ok(Json(jobs))
}
