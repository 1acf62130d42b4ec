use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::error::AppError;
use crate::common::state::AppState;
use crate::ledger::{self, AdjustOutcome};
use crate::observability::{self, Metrics};
use crate::store::jobs as jobs_store;

const DEAD_LETTER_PAGE_SIZE: i64 = 100;

pub async fn metrics(State(state): State<AppState>) -> Result<Json<Metrics>, AppError> {
    Ok(Json(observability::metrics(&state.db, &state).await?))
}

#[derive(Serialize)]
pub struct DeadLetterSummary {
    id: Uuid,
    job_id: Uuid,
    user_id: Uuid,
    reason: String,
}

pub async fn dead_letters(State(state): State<AppState>) -> Result<Json<Vec<DeadLetterSummary>>, AppError> {
    let rows = jobs_store::list_dead_letters(&state.db, DEAD_LETTER_PAGE_SIZE)
        .await
        .map_err(AppError::Database)?;
    Ok(Json(
        rows.into_iter()
            .map(|(id, job_id, user_id, reason)| DeadLetterSummary { id, job_id, user_id, reason })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct AdjustCreditsRequest {
    user_id: Uuid,
    delta: i64,
    reason: String,
    idempotency_key: String,
}

#[derive(Serialize)]
pub struct AdjustCreditsResponse {
    applied: bool,
    amount: i64,
    balance_after: i64,
}

pub async fn adjust_credits(
    State(state): State<AppState>,
    Json(body): Json<AdjustCreditsRequest>,
) -> Result<Json<AdjustCreditsResponse>, AppError> {
    let mut tx = state.db.begin().await.map_err(AppError::Database)?;
    let AdjustOutcome { applied, amount, balance_after } =
        ledger::adjust(&mut tx, body.user_id, body.delta, &body.reason, &body.idempotency_key).await?;
    tx.commit().await.map_err(AppError::Database)?;

    Ok(Json(AdjustCreditsResponse { applied, amount, balance_after }))
}
