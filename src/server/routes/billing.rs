use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};

use crate::common::error::AppError;
use crate::common::state::AppState;
use crate::server::middleware::session_auth::AuthUser;
use crate::webhook::{self, IngestOutcome};

#[derive(Deserialize)]
pub struct CheckoutSessionRequest {
    credits: i64,
    success_url: String,
    cancel_url: String,
    #[serde(default = "default_currency")]
    currency: String,
}

fn default_currency() -> String {
    "usd".to_string()
}

#[derive(Serialize)]
pub struct CheckoutSessionResponse {
    checkout_session_id: String,
    url: String,
    amount_cents: i64,
}

/// Builds the shape a checkout-session response needs without calling the
/// real Stripe API; the Stripe HTTP SDK itself is an external collaborator
/// out of scope here (see `webhook::ingest` for the side this service does
/// own: applying the resulting webhook to the ledger).
pub async fn checkout_session(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(body): Json<CheckoutSessionRequest>,
) -> Result<Json<CheckoutSessionResponse>, AppError> {
    if body.credits <= 0 {
        return Err(AppError::Validation("credits must be positive".into()));
    }
    let amount_cents = body.credits * state.config.stripe_credit_price_cents;
    let checkout_session_id = format!("cs_stub_{}", uuid::Uuid::new_v4());
    let url = format!(
        "{}?session_id={}&cancel_url={}",
        body.success_url, checkout_session_id, body.cancel_url
    );
    Ok(Json(CheckoutSessionResponse { checkout_session_id, url, amount_cents }))
}

#[derive(Serialize)]
pub struct WebhookResponse {
    ok: bool,
    status: &'static str,
    event_id: String,
    event_type: String,
}

/// Always returns 200 for a verified, parseable event, even when the event
/// itself is ignored or fails to apply: Stripe retries on non-2xx, and
/// retrying a permanently malformed event just wastes deliveries.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let result = webhook::ingest(&state.db, &state.config.stripe_webhook_secret, signature, &body).await?;

    let status = match result.outcome {
        IngestOutcome::Processed => "processed",
        IngestOutcome::Duplicate => "duplicate",
        IngestOutcome::Ignored => "ignored",
        IngestOutcome::Failed => "failed",
    };

    Ok(Json(WebhookResponse { ok: true, status, event_id: result.event_id, event_type: result.event_type }))
}
