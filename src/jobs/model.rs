//! Job and job-event data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum JobEventType {
    Queued,
    Started,
    RetryScheduled,
    Succeeded,
    Failed,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub operation: String,
    pub input: serde_json::Value,
    #[builder(default)]
    pub status: JobStatus,
    #[builder(default = 0)]
    pub attempt_count: i32,
    #[builder(default = 3)]
    pub max_attempts: i32,
    pub credits_cost: i64,
    #[builder(default = Utc::now())]
    pub available_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub finished_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub provider_job_id: Option<String>,
    #[builder(default, setter(strip_option))]
    pub result: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub last_error: Option<String>,
    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Exponential backoff: base 10s, factor 3, cap 900s.
    pub fn backoff_seconds(attempt_count: i32) -> i64 {
        let attempt = attempt_count.max(1) as u32;
        let delay = 10i64.saturating_mul(3i64.saturating_pow(attempt - 1));
        delay.min(900)
    }

    pub fn is_retryable(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: Uuid,
    pub job_id: Uuid,
    pub event_type: JobEventType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
