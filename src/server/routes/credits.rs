use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::common::error::AppError;
use crate::common::state::AppState;
use crate::server::middleware::session_auth::AuthUser;
use crate::store::ledger;

const LEDGER_DEFAULT_LIMIT: i64 = 100;
const LEDGER_MAX_LIMIT: i64 = 500;

#[derive(Serialize)]
pub struct BalanceResponse {
    balance: i64,
}

pub async fn balance(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = ledger::balance_unlocked(&state.db, user.user_id).await.map_err(AppError::Database)?;
    Ok(Json(BalanceResponse { balance }))
}

#[derive(Deserialize)]
pub struct LedgerQuery {
    limit: Option<i64>,
}

pub async fn ledger_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<Vec<ledger::LedgerEntry>>, AppError> {
    let limit = query.limit.unwrap_or(LEDGER_DEFAULT_LIMIT).clamp(1, LEDGER_MAX_LIMIT);
    let entries = ledger::list_for_user(&state.db, user.user_id, limit).await.map_err(AppError::Database)?;
    Ok(Json(entries))
}
