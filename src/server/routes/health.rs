use axum::{extract::State, http::StatusCode, Json};

use crate::common::state::AppState;
use crate::observability;

#[derive(serde::Serialize)]
pub struct LiveResponse {
    status: &'static str,
}

pub async fn liveness() -> Json<LiveResponse> {
    Json(LiveResponse { status: "ok" })
}

pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<observability::Readiness>) {
    let result = observability::readiness(&state.db, &state).await;
    let status = if result.ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(result))
}
