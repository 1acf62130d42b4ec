use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{password, session};
use crate::common::error::AppError;
use crate::common::state::AppState;
use crate::server::middleware::ip_extractor::ClientIp;
use crate::server::middleware::login_lockout;
use crate::server::middleware::session_auth::AuthUser;
use crate::store::users::{self, User};

#[derive(Deserialize)]
pub struct RegisterRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
pub struct UserSummary {
    id: Uuid,
    email: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    ok: bool,
    user: UserSummary,
    token: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let email = body.email.trim().to_string();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("a valid email is required".into()));
    }
    password::validate_policy(&body.password)?;

    if users::find_by_email(&state.db, &email).await.map_err(AppError::Database)?.is_some() {
        return Err(AppError::Conflict("an account with this email already exists".into()));
    }

    let password_hash = password::hash(&body.password);
    let mut tx = state.db.begin().await.map_err(AppError::Database)?;
    let user = users::insert(&mut tx, &email, &password_hash).await.map_err(AppError::Database)?;
    tx.commit().await.map_err(AppError::Database)?;

    let issued = session::issue(&state.db, user.id, state.config.auth_session_days)
        .await
        .map_err(AppError::Database)?;

    Ok(Json(SessionResponse {
        ok: true,
        user: UserSummary { id: user.id, email: user.email },
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let email = body.email.trim().to_string();
    login_lockout::check(&state, &email, ip)?;

    let user = users::find_by_email(&state.db, &email).await.map_err(AppError::Database)?;

    let authenticated = match &user {
        Some(user) if user.is_active => password::verify(&body.password, &user.password_hash),
        _ => false,
    };

    if !authenticated {
        login_lockout::record_failure(&state, &email, ip);
        return Err(AppError::Unauthorized);
    }
    login_lockout::record_success(&state, &email, ip);

    let user = user.expect("authenticated implies user is Some");
    let issued = session::issue(&state.db, user.id, state.config.auth_session_days)
        .await
        .map_err(AppError::Database)?;

    Ok(Json(SessionResponse {
        ok: true,
        user: UserSummary { id: user.id, email: user.email },
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

#[derive(Deserialize)]
pub struct LogoutRequest {
    token: String,
}

#[derive(Serialize)]
pub struct LogoutResponse {
    ok: bool,
    revoked: u64,
}

pub async fn logout(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(body): Json<LogoutRequest>,
) -> Result<Json<LogoutResponse>, AppError> {
    let revoked = session::revoke(&state.db, &body.token).await.map_err(AppError::Database)?;
    Ok(Json(LogoutResponse { ok: true, revoked }))
}

pub async fn me(State(state): State<AppState>, user: AuthUser) -> Result<Json<User>, AppError> {
    let record = users::find_by_id(&state.db, user.user_id)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::NotFound("user".into()))?;
    Ok(Json(record))
}
