use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::common::error::AppError;
use crate::common::state::AppState;
use crate::incidents::model::{Incident, IncidentTask, IncidentTaskAudit, TaskStatus};
use crate::incidents::service;
use crate::store::incidents as incidents_store;

pub async fn list_open(State(state): State<AppState>) -> Result<Json<Vec<Incident>>, AppError> {
    Ok(Json(incidents_store::list_open(&state.db).await.map_err(AppError::Database)?))
}

pub async fn list_tasks(State(state): State<AppState>) -> Result<Json<Vec<IncidentTask>>, AppError> {
    Ok(Json(incidents_store::list_tasks(&state.db).await.map_err(AppError::Database)?))
}

pub async fn task_audit(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Vec<IncidentTaskAudit>>, AppError> {
    Ok(Json(incidents_store::list_audit(&state.db, task_id).await.map_err(AppError::Database)?))
}

#[derive(Deserialize)]
pub struct UpdateTaskStatusRequest {
    status: TaskStatus,
    actor: String,
    reason: Option<String>,
    expected_updated_at: DateTime<Utc>,
}

pub async fn update_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(body): Json<UpdateTaskStatusRequest>,
) -> Result<Json<IncidentTask>, AppError> {
    let updated = service::update_task_status(
        &state.db,
        task_id,
        body.status,
        &body.actor,
        body.reason.as_deref(),
        body.expected_updated_at,
    )
    .await?;
    Ok(Json(updated))
}

#[derive(Deserialize)]
pub struct BatchTaskRequest {
    task_ids: Vec<Uuid>,
    actor: String,
}

pub async fn batch_done(
    State(state): State<AppState>,
    Json(body): Json<BatchTaskRequest>,
) -> Result<Json<Vec<IncidentTask>>, AppError> {
    Ok(Json(service::batch_mark_done(&state.db, &body.task_ids, &body.actor).await?))
}

pub async fn batch_postpone(
    State(state): State<AppState>,
    Json(body): Json<BatchTaskRequest>,
) -> Result<Json<Vec<IncidentTask>>, AppError> {
    Ok(Json(service::batch_postpone_24h(&state.db, &body.task_ids, &body.actor).await?))
}
