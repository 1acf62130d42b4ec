use async_trait::async_trait;

use super::model::IncidentTask;

/// Dispatches an SLA alert for a task crossing into a new overdue bucket.
///
/// Actually sending email/Slack is an external collaborator out of scope
/// here; what's in scope is the dedup bookkeeping and the call site, so the
/// default sinks below are enough to exercise that logic end to end.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, task: &IncidentTask, bucket: &str);
}

pub struct NoopAlertSink;

#[async_trait]
impl AlertSink for NoopAlertSink {
    async fn notify(&self, _task: &IncidentTask, _bucket: &str) {}
}

pub struct LoggingAlertSink;

#[async_trait]
impl AlertSink for LoggingAlertSink {
    async fn notify(&self, task: &IncidentTask, bucket: &str) {
        tracing::warn!(
            task_id = %task.id,
            incident_id = %task.incident_id,
            priority = ?task.priority,
            bucket,
            "SLA alert"
        );
    }
}
