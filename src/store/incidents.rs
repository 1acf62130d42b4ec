use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::incidents::model::{Incident, IncidentTask, IncidentTaskAudit};

pub async fn find_by_fingerprint(
    pool: &PgPool,
    fingerprint: &str,
) -> Result<Option<Incident>, sqlx::Error> {
    sqlx::query_as::<_, Incident>(
        r#"
        SELECT id, fingerprint, severity, incident_type, channel, title, details,
               status, created_at, updated_at, acknowledged_at, resolved_at
        FROM incidents
        WHERE fingerprint = $1
        "#,
    )
    .bind(fingerprint)
    .fetch_optional(pool)
    .await
}

pub async fn insert(pool: &PgPool, incident: &Incident) -> Result<Incident, sqlx::Error> {
    sqlx::query_as::<_, Incident>(
        r#"
        INSERT INTO incidents (id, fingerprint, severity, incident_type, channel, title, details, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, fingerprint, severity, incident_type, channel, title, details,
                  status, created_at, updated_at, acknowledged_at, resolved_at
        "#,
    )
    .bind(incident.id)
    .bind(&incident.fingerprint)
    .bind(&incident.severity)
    .bind(&incident.incident_type)
    .bind(&incident.channel)
    .bind(&incident.title)
    .bind(&incident.details)
    .bind(incident.status)
    .fetch_one(pool)
    .await
}

/// Updates fields and `updated_at`; reopens a resolved incident by clearing
/// ack/resolve timestamps.
pub async fn update(pool: &PgPool, incident: &Incident) -> Result<Incident, sqlx::Error> {
    sqlx::query_as::<_, Incident>(
        r#"
        UPDATE incidents
        SET severity = $2, incident_type = $3, channel = $4, title = $5, details = $6,
            status = $7, updated_at = NOW(), acknowledged_at = $8, resolved_at = $9
        WHERE id = $1
        RETURNING id, fingerprint, severity, incident_type, channel, title, details,
                  status, created_at, updated_at, acknowledged_at, resolved_at
        "#,
    )
    .bind(incident.id)
    .bind(&incident.severity)
    .bind(&incident.incident_type)
    .bind(&incident.channel)
    .bind(&incident.title)
    .bind(&incident.details)
    .bind(incident.status)
    .bind(incident.acknowledged_at)
    .bind(incident.resolved_at)
    .fetch_one(pool)
    .await
}

pub async fn list_open(pool: &PgPool) -> Result<Vec<Incident>, sqlx::Error> {
    sqlx::query_as::<_, Incident>(
        r#"
        SELECT id, fingerprint, severity, incident_type, channel, title, details,
               status, created_at, updated_at, acknowledged_at, resolved_at
        FROM incidents
        WHERE status != 'resolved'
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn find_open_task_for_action(
    pool: &PgPool,
    incident_id: Uuid,
    action_type: &str,
) -> Result<Option<IncidentTask>, sqlx::Error> {
    sqlx::query_as::<_, IncidentTask>(
        r#"
        SELECT id, incident_id, status, owner, priority, due_at, title, action_type, payload,
               updated_at, done_at, overdue_since, retry_count, reopen_count,
               last_sla_alert_bucket, last_sla_alert_at
        FROM incident_tasks
        WHERE incident_id = $1 AND action_type = $2 AND status IN ('pending', 'in_progress')
        "#,
    )
    .bind(incident_id)
    .bind(action_type)
    .fetch_optional(pool)
    .await
}

pub async fn insert_task(pool: &PgPool, task: &IncidentTask) -> Result<IncidentTask, sqlx::Error> {
    sqlx::query_as::<_, IncidentTask>(
        r#"
        INSERT INTO incident_tasks
            (id, incident_id, status, owner, priority, due_at, title, action_type, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id, incident_id, status, owner, priority, due_at, title, action_type, payload,
                  updated_at, done_at, overdue_since, retry_count, reopen_count,
                  last_sla_alert_bucket, last_sla_alert_at
        "#,
    )
    .bind(task.id)
    .bind(task.incident_id)
    .bind(task.status)
    .bind(&task.owner)
    .bind(task.priority)
    .bind(task.due_at)
    .bind(&task.title)
    .bind(&task.action_type)
    .bind(&task.payload)
    .fetch_one(pool)
    .await
}

pub async fn find_task(pool: &PgPool, id: Uuid) -> Result<Option<IncidentTask>, sqlx::Error> {
    sqlx::query_as::<_, IncidentTask>(
        r#"
        SELECT id, incident_id, status, owner, priority, due_at, title, action_type, payload,
               updated_at, done_at, overdue_since, retry_count, reopen_count,
               last_sla_alert_bucket, last_sla_alert_at
        FROM incident_tasks
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn lock_task(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<IncidentTask>, sqlx::Error> {
    sqlx::query_as::<_, IncidentTask>(
        r#"
        SELECT id, incident_id, status, owner, priority, due_at, title, action_type, payload,
               updated_at, done_at, overdue_since, retry_count, reopen_count,
               last_sla_alert_bucket, last_sla_alert_at
        FROM incident_tasks
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn update_task(
    tx: &mut Transaction<'_, Postgres>,
    task: &IncidentTask,
) -> Result<IncidentTask, sqlx::Error> {
    sqlx::query_as::<_, IncidentTask>(
        r#"
        UPDATE incident_tasks
        SET status = $2, owner = $3, priority = $4, due_at = $5, payload = $6,
            updated_at = NOW(), done_at = $7, overdue_since = $8, retry_count = $9,
            reopen_count = $10, last_sla_alert_bucket = $11, last_sla_alert_at = $12
        WHERE id = $1
        RETURNING id, incident_id, status, owner, priority, due_at, title, action_type, payload,
                  updated_at, done_at, overdue_since, retry_count, reopen_count,
                  last_sla_alert_bucket, last_sla_alert_at
        "#,
    )
    .bind(task.id)
    .bind(task.status)
    .bind(&task.owner)
    .bind(task.priority)
    .bind(task.due_at)
    .bind(&task.payload)
    .bind(task.done_at)
    .bind(task.overdue_since)
    .bind(task.retry_count)
    .bind(task.reopen_count)
    .bind(&task.last_sla_alert_bucket)
    .bind(task.last_sla_alert_at)
    .fetch_one(&mut **tx)
    .await
}

pub async fn list_tasks(pool: &PgPool) -> Result<Vec<IncidentTask>, sqlx::Error> {
    sqlx::query_as::<_, IncidentTask>(
        r#"
        SELECT id, incident_id, status, owner, priority, due_at, title, action_type, payload,
               updated_at, done_at, overdue_since, retry_count, reopen_count,
               last_sla_alert_bucket, last_sla_alert_at
        FROM incident_tasks
        ORDER BY priority, due_at NULLS LAST
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn insert_audit(
    executor: impl sqlx::PgExecutor<'_>,
    task_id: Uuid,
    actor: &str,
    action: &str,
    change: serde_json::Value,
) -> Result<IncidentTaskAudit, sqlx::Error> {
    sqlx::query_as::<_, IncidentTaskAudit>(
        r#"
        INSERT INTO incident_task_audit (id, task_id, actor, action, change)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, task_id, actor, action, change, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(task_id)
    .bind(actor)
    .bind(action)
    .bind(change)
    .fetch_one(executor)
    .await
}

pub async fn list_audit(pool: &PgPool, task_id: Uuid) -> Result<Vec<IncidentTaskAudit>, sqlx::Error> {
    sqlx::query_as::<_, IncidentTaskAudit>(
        "SELECT id, task_id, actor, action, change, created_at FROM incident_task_audit WHERE task_id = $1 ORDER BY created_at",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
}

