//! Incident task board: optimistic-concurrency status transitions and
//! SLA-bucket alert dedupe.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::TestHarness;
use creditworks_core::common::error::AppError;
use creditworks_core::incidents::alert::AlertSink;
use creditworks_core::incidents::model::{IncidentTask, Priority, TaskStatus};
use creditworks_core::incidents::service;
use creditworks_core::store::incidents as incidents_store;
use test_context::test_context;

struct CountingAlertSink {
    count: AtomicUsize,
}

impl CountingAlertSink {
    fn new() -> Self {
        Self { count: AtomicUsize::new(0) }
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertSink for CountingAlertSink {
    async fn notify(&self, _task: &IncidentTask, _bucket: &str) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn two_edits_with_the_same_expected_updated_at_produce_one_success_one_conflict(ctx: &TestHarness) {
    let incident = service::upsert_incident(
        &ctx.db,
        "scrape_failure",
        "email",
        "Scrape failed for example.com",
        "warning",
        serde_json::json!({}),
    )
    .await
    .unwrap();

    let task = IncidentTask::builder().incident_id(incident.id).title("Triage").action_type("triage").build();
    let task = incidents_store::insert_task(&ctx.db, &task).await.unwrap();

    let expected = task.updated_at;
    let pool_a = ctx.db.clone();
    let pool_b = ctx.db.clone();

    let (result_a, result_b) = tokio::join!(
        service::update_task_status(&pool_a, task.id, TaskStatus::InProgress, "agent-a", None, expected),
        service::update_task_status(&pool_b, task.id, TaskStatus::Cancelled, "agent-b", None, expected),
    );

    let results = [result_a, result_b];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results.iter().filter(|r| matches!(r, Err(AppError::Conflict(_)))).count();
    assert_eq!(successes, 1, "exactly one edit should win against the shared expected_updated_at");
    assert_eq!(conflicts, 1, "the loser must fail with a conflict, not silently overwrite");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn sla_alert_fires_once_per_bucket(ctx: &TestHarness) {
    let incident = service::upsert_incident(
        &ctx.db,
        "job_failure_spike",
        "slack",
        "Job failure rate above threshold",
        "critical",
        serde_json::json!({}),
    )
    .await
    .unwrap();

    let task = IncidentTask::builder()
        .incident_id(incident.id)
        .title("Triage")
        .action_type("triage")
        .priority(Priority::P1)
        .due_at(Utc::now() - Duration::hours(10))
        .build();
    let task = incidents_store::insert_task(&ctx.db, &task).await.unwrap();
    assert_eq!(task.sla_bucket(Utc::now()), "4-24h");

    let sink_concrete = Arc::new(CountingAlertSink::new());
    let sink: Arc<dyn AlertSink> = sink_concrete.clone();

    service::check_sla_and_alert(&ctx.db, &sink).await.unwrap();
    service::check_sla_and_alert(&ctx.db, &sink).await.unwrap();
    service::check_sla_and_alert(&ctx.db, &sink).await.unwrap();

    assert_eq!(sink_concrete.count(), 1, "repeated polls in the same overdue bucket must not re-alert");

    let refreshed = incidents_store::find_task(&ctx.db, task.id).await.unwrap().unwrap();
    assert_eq!(refreshed.last_sla_alert_bucket.as_deref(), Some("4-24h"));
}
