use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::common::error::AppError;
use crate::common::state::AppState;

/// Rejects requests whose `Origin` header isn't on the configured
/// allowlist. An absent `Origin` header (same-origin requests, curl,
/// server-to-server calls) is allowed through; this guards the
/// cross-origin browser surface, not the API as a whole.
pub async fn enforce_origin_allowlist(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.config.auth_origin_allowlist.is_empty() {
        return Ok(next.run(request).await);
    }

    let origin = request.headers().get("origin").and_then(|v| v.to_str().ok());
    if let Some(origin) = origin {
        if !state.config.auth_origin_allowlist.iter().any(|allowed| allowed == origin) {
            return Err(AppError::Forbidden("origin not allowed".into()));
        }
    }

    Ok(next.run(request).await)
}
