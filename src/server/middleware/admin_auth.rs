use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::common::error::AppError;
use crate::common::state::AppState;

#[derive(Deserialize)]
pub struct AdminTokenQuery {
    token: Option<String>,
}

/// Accepts the admin token via `x-admin-token` header or `token` query
/// param, compared in constant time against the configured secret.
pub async fn require_admin_token(
    State(state): State<AppState>,
    Query(query): Query<AdminTokenQuery>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = request
        .headers()
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query.token);

    let authorized = presented
        .map(|p| p.as_bytes().ct_eq(state.config.admin_token.as_bytes()).into())
        .unwrap_or(false);

    if !authorized {
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}
