use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

#[derive(FromRow, Debug, Clone)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_text: Option<String>,
}

/// Dedupe anchor: `None` means `(provider, event_id)` already existed.
pub async fn insert_if_new(
    tx: &mut Transaction<'_, Postgres>,
    provider: &str,
    event_id: &str,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<Option<WebhookEvent>, sqlx::Error> {
    sqlx::query_as::<_, WebhookEvent>(
        r#"
        INSERT INTO webhook_events (id, provider, event_id, event_type, payload, status)
        VALUES ($1, $2, $3, $4, $5, 'received')
        ON CONFLICT (provider, event_id) DO NOTHING
        RETURNING id, provider, event_id, event_type, payload, status, received_at, processed_at, error_text
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(provider)
    .bind(event_id)
    .bind(event_type)
    .bind(payload)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn mark_status(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    status: &str,
    error_text: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE webhook_events
        SET status = $1, processed_at = NOW(), error_text = $2
        WHERE id = $3
        "#,
    )
    .bind(status)
    .bind(error_text)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn count_failed_since(
    pool: &sqlx::PgPool,
    since: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM webhook_events WHERE status = 'failed' AND received_at >= $1",
    )
    .bind(since)
    .fetch_one(pool)
    .await
}
