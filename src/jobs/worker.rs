//! Claims queued jobs with `FOR UPDATE SKIP LOCKED`, dispatches them to a
//! provider adapter outside the claim transaction, and settles credits and
//! status in a fresh transaction once the adapter returns. A separate pass
//! recovers jobs stuck in `running` past a staleness threshold, which
//! happens when a previous worker process died mid-dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::common::state::AppState;
use crate::ledger::{self, ReleaseReason};
use crate::store::jobs as jobs_store;

use super::model::{Job, JobEventType, JobStatus};
use super::provider::{ProviderAdapter, ProviderOutcome};

const BATCH_SIZE: usize = 4;
const POLL_INTERVAL: StdDuration = StdDuration::from_secs(1);

pub struct Worker {
    pool: PgPool,
    state: AppState,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    stale_seconds: i64,
}

impl Worker {
    pub fn new(
        pool: PgPool,
        state: AppState,
        adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
        stale_seconds: i64,
    ) -> Self {
        Self { pool, state, adapters, stale_seconds }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("worker loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.state.record_heartbeat();

                    if let Err(error) = self.recover_stale().await {
                        tracing::error!(%error, "stale recovery pass failed");
                    }

                    match self.claim_batch().await {
                        Ok(jobs) if !jobs.is_empty() => {
                            let dispatches = jobs.into_iter().map(|job| self.process(job));
                            futures::future::join_all(dispatches).await;
                        }
                        Ok(_) => {}
                        Err(error) => tracing::error!(%error, "job claim failed"),
                    }
                }
            }
        }
    }

    async fn claim_batch(&self) -> Result<Vec<Job>, sqlx::Error> {
        let mut claimed = Vec::new();
        for _ in 0..BATCH_SIZE {
            let mut tx = self.pool.begin().await?;
            match jobs_store::claim_next(&mut tx).await? {
                Some(job) => {
                    jobs_store::insert_event(&mut tx, job.id, JobEventType::Started, json!({}))
                        .await?;
                    tx.commit().await?;
                    claimed.push(job);
                }
                None => {
                    tx.rollback().await?;
                    break;
                }
            }
        }
        Ok(claimed)
    }

    async fn process(&self, job: Job) {
        let Some(adapter) = self.adapters.get(&job.provider).cloned() else {
            tracing::error!(job_id = %job.id, provider = %job.provider, "no adapter registered for provider");
            self.settle_failure(&job, "no adapter registered for provider".to_string()).await;
            return;
        };

        match adapter.dispatch(&job).await {
            ProviderOutcome::Succeeded { provider_job_id, result } => {
                self.settle_success(&job, provider_job_id, result).await
            }
            ProviderOutcome::Failed { error } => self.settle_failure(&job, error).await,
        }
    }

    async fn settle_success(
        &self,
        job: &Job,
        provider_job_id: Option<String>,
        result: serde_json::Value,
    ) {
        let outcome: Result<(), sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;
            jobs_store::lock_running(&mut tx, job.id).await?;

            ledger::release_hold(&mut tx, job.user_id, job.id, job.credits_cost, ReleaseReason::Success)
                .await
                .map_err(sqlx_err_from_app)?;
            ledger::consume_for_job(&mut tx, job.user_id, job.id, job.credits_cost)
                .await
                .map_err(sqlx_err_from_app)?;

            jobs_store::mark_succeeded(&mut tx, job.id, provider_job_id.as_deref(), &result).await?;
            jobs_store::insert_event(&mut tx, job.id, JobEventType::Succeeded, result.clone()).await?;

            tx.commit().await
        }
        .await;

        if let Err(error) = outcome {
            tracing::error!(job_id = %job.id, %error, "failed to settle successful job");
        }
    }

    async fn settle_failure(&self, job: &Job, error: String) {
        let outcome: Result<(), sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;
            jobs_store::lock_running(&mut tx, job.id).await?;

            if job.is_retryable() {
                let delay = Job::backoff_seconds(job.attempt_count);
                let available_at = Utc::now() + ChronoDuration::seconds(delay);
                jobs_store::mark_queued_for_retry(&mut tx, job.id, available_at, &error).await?;
                jobs_store::insert_event(
                    &mut tx,
                    job.id,
                    JobEventType::RetryScheduled,
                    json!({ "error": error, "retry_at": available_at }),
                )
                .await?;
            } else {
                ledger::release_hold(&mut tx, job.user_id, job.id, job.credits_cost, ReleaseReason::Fail)
                    .await
                    .map_err(sqlx_err_from_app)?;
                jobs_store::mark_failed(&mut tx, job.id, &error).await?;
                jobs_store::insert_dead_letter(&mut tx, job.id, job.user_id, &error, &job.input).await?;
                jobs_store::insert_event(&mut tx, job.id, JobEventType::Failed, json!({ "error": error }))
                    .await?;
            }

            tx.commit().await
        }
        .await;

        if let Err(error) = outcome {
            tracing::error!(job_id = %job.id, %error, "failed to settle failed job");
        }
    }

    /// Requeues jobs stuck in `running` past the staleness window, or fails
    /// and dead-letters them if they have no attempts left. Does not
    /// re-increment `attempt_count` on requeue: the claim that left them
    /// stuck already counted as an attempt.
    async fn recover_stale(&self) -> Result<(), sqlx::Error> {
        let stale = jobs_store::find_stale_running(&self.pool, self.stale_seconds).await?;
        for job in stale {
            let mut tx = self.pool.begin().await?;
            if let Some(locked) = jobs_store::lock_any(&mut tx, job.id).await? {
                if locked.status == JobStatus::Running {
                    if locked.is_retryable() {
                        jobs_store::mark_queued_for_retry(
                            &mut tx,
                            locked.id,
                            Utc::now(),
                            "recovered from stale running state",
                        )
                        .await?;
                        jobs_store::insert_event(
                            &mut tx,
                            locked.id,
                            JobEventType::RetryScheduled,
                            json!({ "reason": "stale_recovery" }),
                        )
                        .await?;
                    } else {
                        let error = "recovered from stale running state with no attempts remaining";
                        ledger::release_hold(&mut tx, locked.user_id, locked.id, locked.credits_cost, ReleaseReason::Fail)
                            .await
                            .map_err(sqlx_err_from_app)?;
                        jobs_store::mark_failed(&mut tx, locked.id, error).await?;
                        jobs_store::insert_dead_letter(&mut tx, locked.id, locked.user_id, error, &locked.input)
                            .await?;
                        jobs_store::insert_event(&mut tx, locked.id, JobEventType::Failed, json!({ "error": error }))
                            .await?;
                    }
                }
            }
            tx.commit().await?;
        }
        Ok(())
    }
}

/// Ledger failures inside the worker are a database or consistency problem,
/// not user-facing; fold them back into `sqlx::Error` so the settlement
/// closures keep a single error type.
fn sqlx_err_from_app(err: crate::common::error::AppError) -> sqlx::Error {
    sqlx::Error::Protocol(err.to_string())
}
