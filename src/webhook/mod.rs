//! Inbound payment-provider webhooks. Stripe-style: an `HMAC-SHA256`
//! signature over `"{timestamp}.{body}"`, a dedupe anchor on
//! `(provider, event_id)`, and an idempotent credit top-up on success.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::common::error::AppError;
use crate::ledger;
use crate::store::webhooks;

const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Processed,
    Duplicate,
    Ignored,
    Failed,
}

/// What `ingest` did with an event, plus enough of the event's own identity
/// for the caller to report back to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestResult {
    pub outcome: IngestOutcome,
    pub event_id: String,
    pub event_type: String,
}

#[derive(Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Deserialize)]
struct StripeEventData {
    object: StripeEventObject,
}

#[derive(Deserialize)]
struct StripeEventObject {
    #[serde(default)]
    metadata: StripeMetadata,
    #[serde(default)]
    client_reference_id: Option<Uuid>,
}

#[derive(Deserialize, Default)]
struct StripeMetadata {
    user_id: Option<Uuid>,
    credits: Option<i64>,
}

/// Parses a `t=<unix seconds>,v1=<hex hmac>` header, recomputes the HMAC
/// over `"{t}.{body}"`, and rejects stale signatures outside the
/// tolerance window.
fn verify_signature(secret: &str, header: &str, body: &[u8]) -> Result<(), AppError> {
    let mut timestamp: Option<i64> = None;
    let mut signature: Option<&str> = None;
    for part in header.split(',') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => timestamp = v.parse().ok(),
            (Some("v1"), Some(v)) => signature = Some(v),
            _ => {}
        }
    }
    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return Err(AppError::Unauthorized);
    };

    if (Utc::now().timestamp() - timestamp).abs() > DEFAULT_TOLERANCE_SECONDS {
        return Err(AppError::Unauthorized);
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(e.into()))?;
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let expected_hex = hex::encode(expected);

    if expected_hex.as_bytes().ct_eq(signature.as_bytes()).into() {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

/// Verifies the signature, dedupes on `(provider, event_id)`, and applies
/// the credit top-up described by the event. Always commits: a malformed
/// or unrecognized event is recorded as `ignored`/`failed` rather than
/// retried, since Stripe retries are keyed on HTTP status and these aren't
/// transient failures.
pub async fn ingest(
    pool: &PgPool,
    secret: &str,
    signature_header: &str,
    body: &[u8],
) -> Result<IngestResult, AppError> {
    verify_signature(secret, signature_header, body)?;

    let event: StripeEvent = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("malformed webhook payload: {e}")))?;

    let result = |outcome: IngestOutcome| IngestResult {
        outcome,
        event_id: event.id.clone(),
        event_type: event.event_type.clone(),
    };

    let mut tx = pool.begin().await.map_err(AppError::Database)?;

    let inserted = webhooks::insert_if_new(
        &mut tx,
        "stripe",
        &event.id,
        &event.event_type,
        &serde_json::from_slice(body).unwrap_or(serde_json::Value::Null),
    )
    .await
    .map_err(AppError::Database)?;

    let Some(webhook_event) = inserted else {
        tx.commit().await.map_err(AppError::Database)?;
        return Ok(result(IngestOutcome::Duplicate));
    };

    if event.event_type != "checkout.session.completed" {
        webhooks::mark_status(&mut tx, webhook_event.id, "ignored", None)
            .await
            .map_err(AppError::Database)?;
        tx.commit().await.map_err(AppError::Database)?;
        return Ok(result(IngestOutcome::Ignored));
    }

    let object = &event.data.object;
    let user_id = object.metadata.user_id.or(object.client_reference_id);
    let (Some(user_id), Some(credits)) = (user_id, object.metadata.credits) else {
        webhooks::mark_status(
            &mut tx,
            webhook_event.id,
            "failed",
            Some("missing user_id or credits in event metadata"),
        )
        .await
        .map_err(AppError::Database)?;
        tx.commit().await.map_err(AppError::Database)?;
        return Ok(result(IngestOutcome::Failed));
    };

    if credits <= 0 {
        webhooks::mark_status(&mut tx, webhook_event.id, "failed", Some("non-positive credits"))
            .await
            .map_err(AppError::Database)?;
        tx.commit().await.map_err(AppError::Database)?;
        return Ok(result(IngestOutcome::Failed));
    }

    let idempotency_key = format!("stripe:{}:topup", event.id);
    ledger::apply_topup(&mut tx, user_id, credits, "stripe_checkout", &event.id, &idempotency_key)
        .await?;

    webhooks::mark_status(&mut tx, webhook_event.id, "processed", None)
        .await
        .map_err(AppError::Database)?;
    tx.commit().await.map_err(AppError::Database)?;

    Ok(result(IngestOutcome::Processed))
}
