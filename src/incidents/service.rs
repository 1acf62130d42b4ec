//! Business logic for the incident task board: fingerprint-deduped
//! incidents, per-incident triage tasks, optimistic-concurrency status
//! transitions with an audit trail, and SLA-bucket alerting.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::common::error::AppError;
use crate::store::incidents as incidents_store;

use super::alert::AlertSink;
use super::model::{fingerprint, Incident, IncidentStatus, IncidentTask, Priority, TaskStatus};

const TRIAGE_ACTION: &str = "triage";
const SLA_POLL_INTERVAL: StdDuration = StdDuration::from_secs(60);

/// Inserts a new incident, or reopens and refreshes an existing one found
/// by `fingerprint(incident_type, channel, title)`. Reopening a resolved
/// incident clears `acknowledged_at`/`resolved_at`.
pub async fn upsert_incident(
    pool: &PgPool,
    incident_type: &str,
    channel: &str,
    title: &str,
    severity: &str,
    details: serde_json::Value,
) -> Result<Incident, AppError> {
    let fp = fingerprint(incident_type, channel, title);

    if let Some(mut existing) = incidents_store::find_by_fingerprint(pool, &fp)
        .await
        .map_err(AppError::Database)?
    {
        existing.severity = severity.to_string();
        existing.details = details;
        if existing.status == IncidentStatus::Resolved {
            existing.status = IncidentStatus::Open;
            existing.acknowledged_at = None;
            existing.resolved_at = None;
        }
        return incidents_store::update(pool, &existing).await.map_err(AppError::Database);
    }

    let incident = Incident::builder()
        .fingerprint(fp)
        .severity(severity)
        .incident_type(incident_type)
        .channel(channel)
        .title(title)
        .details(details)
        .build();

    incidents_store::insert(pool, &incident).await.map_err(AppError::Database)
}

fn default_task_shape(severity: &str) -> (Priority, i64) {
    match severity {
        "critical" => (Priority::P1, 4),
        "warning" => (Priority::P2, 24),
        _ => (Priority::P3, 72),
    }
}

/// Ensures every open incident has a live (non-terminal) triage task. No-op
/// for incidents that already have one, enforced by the database's partial
/// unique index rather than re-checked here beyond the existence query.
pub async fn sync_tasks_from_open_incidents(pool: &PgPool) -> Result<Vec<IncidentTask>, AppError> {
    let open = incidents_store::list_open(pool).await.map_err(AppError::Database)?;
    let mut created = Vec::new();

    for incident in open {
        let has_task =
            incidents_store::find_open_task_for_action(pool, incident.id, TRIAGE_ACTION)
                .await
                .map_err(AppError::Database)?
                .is_some();
        if has_task {
            continue;
        }

        let (priority, due_in_hours) = default_task_shape(&incident.severity);
        let task = IncidentTask::builder()
            .incident_id(incident.id)
            .title(format!("Triage: {}", incident.title))
            .action_type(TRIAGE_ACTION)
            .priority(priority)
            .due_at(Utc::now() + Duration::hours(due_in_hours))
            .build();

        created.push(incidents_store::insert_task(pool, &task).await.map_err(AppError::Database)?);
    }

    Ok(created)
}

fn recompute_overdue_since(
    status: TaskStatus,
    due_at: Option<DateTime<Utc>>,
    previous: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if status.is_terminal() {
        return None;
    }
    match due_at {
        Some(due) if now > due => Some(previous.unwrap_or(now)),
        _ => None,
    }
}

/// Optimistic-concurrency status transition. `expected_updated_at` must
/// match the row's current `updated_at` or the call fails with `Conflict`.
/// A terminal-to-in-progress transition (reopening) bumps both
/// `retry_count` and `reopen_count`.
pub async fn update_task_status(
    pool: &PgPool,
    task_id: Uuid,
    new_status: TaskStatus,
    actor: &str,
    reason: Option<&str>,
    expected_updated_at: DateTime<Utc>,
) -> Result<IncidentTask, AppError> {
    let mut tx = pool.begin().await.map_err(AppError::Database)?;

    let mut task = incidents_store::lock_task(&mut tx, task_id)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::NotFound("incident task".into()))?;

    if task.updated_at != expected_updated_at {
        return Err(AppError::Conflict("task was modified concurrently".into()));
    }

    let now = Utc::now();
    let reopened = task.status.is_terminal() && new_status == TaskStatus::InProgress;
    let old_status = task.status;

    if reopened {
        task.retry_count += 1;
        task.reopen_count += 1;
    }

    task.status = new_status;
    task.done_at = if new_status == TaskStatus::Done { Some(now) } else { None };
    task.overdue_since = recompute_overdue_since(new_status, task.due_at, task.overdue_since, now);

    let truncated_reason: Option<String> =
        reason.map(|r| r.chars().take(300).collect::<String>());

    let updated = incidents_store::update_task(&mut tx, &task).await.map_err(AppError::Database)?;

    let mut change = json!({
        "from": old_status,
        "to": new_status,
        "reason": truncated_reason,
    });
    if reopened {
        change["reopen_rule"] = json!("terminal_to_in_progress");
    }

    incidents_store::insert_audit(&mut *tx, task_id, actor, "status_change", change)
        .await
        .map_err(AppError::Database)?;

    tx.commit().await.map_err(AppError::Database)?;
    Ok(updated)
}

/// Marks every listed task `Done`, skipping (rather than failing) ids that
/// don't exist or whose concurrency check fails, and returns the ones that
/// actually changed.
pub async fn batch_mark_done(
    pool: &PgPool,
    task_ids: &[Uuid],
    actor: &str,
) -> Result<Vec<IncidentTask>, AppError> {
    let mut updated = Vec::new();
    for &task_id in task_ids {
        let Some(task) = incidents_store::find_task(pool, task_id).await.map_err(AppError::Database)?
        else {
            continue;
        };
        if let Ok(result) =
            update_task_status(pool, task_id, TaskStatus::Done, actor, None, task.updated_at).await
        {
            updated.push(result);
        }
    }
    Ok(updated)
}

/// Pushes `due_at` back 24 hours without changing status.
pub async fn batch_postpone_24h(
    pool: &PgPool,
    task_ids: &[Uuid],
    actor: &str,
) -> Result<Vec<IncidentTask>, AppError> {
    let mut updated = Vec::new();
    for &task_id in task_ids {
        let mut tx = pool.begin().await.map_err(AppError::Database)?;
        let Some(mut task) = incidents_store::lock_task(&mut tx, task_id).await.map_err(AppError::Database)?
        else {
            tx.rollback().await.map_err(AppError::Database)?;
            continue;
        };

        let old_due_at = task.due_at;
        task.due_at = Some(task.due_at.unwrap_or_else(Utc::now) + Duration::hours(24));

        let result = incidents_store::update_task(&mut tx, &task).await.map_err(AppError::Database)?;
        incidents_store::insert_audit(
            &mut *tx,
            task_id,
            actor,
            "postponed",
            json!({ "from_due_at": old_due_at, "to_due_at": task.due_at }),
        )
        .await
        .map_err(AppError::Database)?;

        tx.commit().await.map_err(AppError::Database)?;
        updated.push(result);
    }
    Ok(updated)
}

/// Alerts on every non-terminal P1 task whose SLA bucket has advanced since
/// the last alert, deduping on `(bucket)` so a task alerts once per bucket
/// rather than once per poll. P2/P3 tasks are tracked for overdue-since but
/// never page.
pub async fn check_sla_and_alert(pool: &PgPool, alert_sink: &Arc<dyn AlertSink>) -> Result<(), AppError> {
    let now = Utc::now();
    let tasks = incidents_store::list_tasks(pool).await.map_err(AppError::Database)?;

    for task in tasks {
        if task.status.is_terminal() {
            continue;
        }
        if task.priority != Priority::P1 {
            continue;
        }
        let bucket = task.sla_bucket(now);
        if bucket == "on_time" {
            continue;
        }
        if task.last_sla_alert_bucket.as_deref() == Some(bucket) {
            continue;
        }

        alert_sink.notify(&task, bucket).await;

        let mut tx = pool.begin().await.map_err(AppError::Database)?;
        if let Some(mut locked) = incidents_store::lock_task(&mut tx, task.id).await.map_err(AppError::Database)? {
            locked.last_sla_alert_bucket = Some(bucket.to_string());
            locked.last_sla_alert_at = Some(now);
            incidents_store::update_task(&mut tx, &locked).await.map_err(AppError::Database)?;
        }
        tx.commit().await.map_err(AppError::Database)?;
    }

    Ok(())
}

/// Background loop: keeps every open incident's triage task alive and fires
/// SLA alerts for tasks that crossed into a new overdue bucket.
pub async fn run_sla_loop(pool: PgPool, alert_sink: Arc<dyn AlertSink>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(SLA_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("incident SLA loop shutting down");
                break;
            }
            _ = interval.tick() => {
                if let Err(error) = sync_tasks_from_open_incidents(&pool).await {
                    tracing::error!(%error, "failed to sync tasks from open incidents");
                }
                if let Err(error) = check_sla_and_alert(&pool, &alert_sink).await {
                    tracing::error!(%error, "failed to run SLA alert pass");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overdue_since_clears_on_terminal_status() {
        let now = Utc::now();
        assert_eq!(recompute_overdue_since(TaskStatus::Done, Some(now - Duration::hours(1)), None, now), None);
    }

    #[test]
    fn overdue_since_preserves_earliest_timestamp() {
        let now = Utc::now();
        let earlier = now - Duration::hours(5);
        let due = now - Duration::hours(1);
        assert_eq!(
            recompute_overdue_since(TaskStatus::Pending, Some(due), Some(earlier), now),
            Some(earlier)
        );
    }

    #[test]
    fn overdue_since_is_none_when_not_past_due() {
        let now = Utc::now();
        let due = now + Duration::hours(1);
        assert_eq!(recompute_overdue_since(TaskStatus::Pending, Some(due), None, now), None);
    }
}
