use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::session;
use crate::common::error::AppError;
use crate::common::state::AppState;

/// Authenticated user, populated when the request carries a valid session
/// token. Absence of this extension means "not logged in", not "rejected":
/// authorization decisions happen in the route handlers and in
/// `require_auth`, not here.
#[derive(Clone, Copy, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthUser>().copied().ok_or(AppError::Unauthorized)
    }
}

/// Extracts the session token from `Authorization: Bearer <token>`, looks
/// it up, and stores an `AuthUser` extension when valid. Never blocks the
/// request.
pub async fn session_auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if let Some(token) = bearer_token(&request) {
        if let Ok(Some(user_id)) = session::authenticate(&state.db, token).await {
            request.extensions_mut().insert(AuthUser { user_id });
        }
    }
    next.run(request).await
}

fn bearer_token(request: &Request) -> Option<&str> {
    let header = request.headers().get("authorization")?.to_str().ok()?;
    header.strip_prefix("Bearer ").or(Some(header))
}
