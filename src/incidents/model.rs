//! Incident and incident-task data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha1};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    Open,
    Ack,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum Priority {
    P1,
    P2,
    #[default]
    P3,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Incident {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub fingerprint: String,
    pub severity: String,
    pub incident_type: String,
    pub channel: String,
    pub title: String,
    #[builder(default = serde_json::json!({}))]
    pub details: serde_json::Value,
    #[builder(default)]
    pub status: IncidentStatus,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// `fingerprint = SHA1_24(type|channel|title)`: lowercase hex of the first
/// 24 characters of the SHA-1 hex digest.
pub fn fingerprint(incident_type: &str, channel: &str, title: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{incident_type}|{channel}|{title}").as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..24].to_string()
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct IncidentTask {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub incident_id: Uuid,
    #[builder(default)]
    pub status: TaskStatus,
    #[builder(default, setter(strip_option))]
    pub owner: Option<String>,
    #[builder(default)]
    pub priority: Priority,
    #[builder(default, setter(strip_option))]
    pub due_at: Option<DateTime<Utc>>,
    pub title: String,
    pub action_type: String,
    #[builder(default = serde_json::json!({}))]
    pub payload: serde_json::Value,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub done_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub overdue_since: Option<DateTime<Utc>>,
    #[builder(default = 0)]
    pub retry_count: i32,
    #[builder(default = 0)]
    pub reopen_count: i32,
    #[builder(default, setter(strip_option))]
    pub last_sla_alert_bucket: Option<String>,
    #[builder(default, setter(strip_option))]
    pub last_sla_alert_at: Option<DateTime<Utc>>,
}

impl IncidentTask {
    /// Overdue bucket: `on_time`, `0-4h`, `4-24h`, `24h+`.
    pub fn sla_bucket(&self, now: DateTime<Utc>) -> &'static str {
        let Some(due_at) = self.due_at else {
            return "on_time";
        };
        if self.status.is_terminal() || now <= due_at {
            return "on_time";
        }
        let overdue_hours = (now - due_at).num_seconds() as f64 / 3600.0;
        if overdue_hours < 4.0 {
            "0-4h"
        } else if overdue_hours < 24.0 {
            "4-24h"
        } else {
            "24h+"
        }
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct IncidentTaskAudit {
    pub id: Uuid,
    pub task_id: Uuid,
    pub actor: String,
    pub action: String,
    pub change: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_24_lowercase_hex_chars() {
        let f = fingerprint("scrape_failure", "email", "Scrape failed for acme.com");
        assert_eq!(f.len(), 24);
        assert!(f.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint("t", "c", "title");
        let b = fingerprint("t", "c", "title");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_fields() {
        let a = fingerprint("t1", "c", "title");
        let b = fingerprint("t2", "c", "title");
        assert_ne!(a, b);
    }

    #[test]
    fn sla_bucket_on_time_when_no_due_date() {
        let task = IncidentTask::builder()
            .incident_id(Uuid::new_v4())
            .title("t")
            .action_type("a")
            .build();
        assert_eq!(task.sla_bucket(Utc::now()), "on_time");
    }

    #[test]
    fn sla_bucket_escalates_with_overdue_time() {
        let now = Utc::now();
        let mut task = IncidentTask::builder()
            .incident_id(Uuid::new_v4())
            .title("t")
            .action_type("a")
            .due_at(now - chrono::Duration::hours(1))
            .build();
        assert_eq!(task.sla_bucket(now), "0-4h");

        task.due_at = Some(now - chrono::Duration::hours(10));
        assert_eq!(task.sla_bucket(now), "4-24h");

        task.due_at = Some(now - chrono::Duration::hours(30));
        assert_eq!(task.sla_bucket(now), "24h+");
    }

    #[test]
    fn sla_bucket_is_on_time_for_terminal_task() {
        let now = Utc::now();
        let mut task = IncidentTask::builder()
            .incident_id(Uuid::new_v4())
            .title("t")
            .action_type("a")
            .due_at(now - chrono::Duration::hours(30))
            .build();
        task.status = TaskStatus::Done;
        assert_eq!(task.sla_bucket(now), "on_time");
    }
}
