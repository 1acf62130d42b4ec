//! External work dispatch. The worker settles a job's credits regardless of
//! which adapter ran it; adapters only decide success/failure and carry
//! back a provider-assigned id and result payload.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;

use super::model::Job;

pub enum ProviderOutcome {
    Succeeded { provider_job_id: Option<String>, result: serde_json::Value },
    Failed { error: String },
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn dispatch(&self, job: &Job) -> ProviderOutcome;
}

/// Echoes the job input back as the result. Used in development and in
/// tests that exercise the worker loop without a network dependency. Honors
/// `input.force_fail: true` or `input.simulate: "fail"` so tests can drive
/// the worker's retry and dead-letter paths without a real provider.
pub struct MockAdapter;

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn dispatch(&self, job: &Job) -> ProviderOutcome {
        let force_fail = job.input.get("force_fail").and_then(|v| v.as_bool()).unwrap_or(false)
            || job.input.get("simulate").and_then(|v| v.as_str()) == Some("fail");

        if force_fail {
            return ProviderOutcome::Failed { error: "mock adapter: simulated failure".to_string() };
        }

        ProviderOutcome::Succeeded {
            provider_job_id: Some(format!("mock-{}", job.id)),
            result: job.input.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ReplicatePrediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Creates a prediction on Replicate and polls it every two seconds until
/// it leaves `starting`/`processing`, or until `poll_timeout` elapses.
pub struct ReplicateAdapter {
    client: reqwest::Client,
    api_token: String,
    poll_timeout: Duration,
}

impl ReplicateAdapter {
    pub fn new(api_token: String, poll_timeout_seconds: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_token,
            poll_timeout: Duration::from_secs(poll_timeout_seconds),
        }
    }

    async fn create_prediction(&self, job: &Job) -> Result<ReplicatePrediction, String> {
        self.client
            .post("https://api.replicate.com/v1/predictions")
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({ "version": job.operation, "input": job.input }))
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json::<ReplicatePrediction>()
            .await
            .map_err(|e| e.to_string())
    }

    async fn poll_prediction(&self, id: &str) -> Result<ReplicatePrediction, String> {
        self.client
            .get(format!("https://api.replicate.com/v1/predictions/{id}"))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json::<ReplicatePrediction>()
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ProviderAdapter for ReplicateAdapter {
    fn name(&self) -> &'static str {
        "replicate"
    }

    async fn dispatch(&self, job: &Job) -> ProviderOutcome {
        let mut prediction = match self.create_prediction(job).await {
            Ok(p) => p,
            Err(error) => return ProviderOutcome::Failed { error },
        };

        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        while matches!(prediction.status.as_str(), "starting" | "processing") {
            if tokio::time::Instant::now() >= deadline {
                return ProviderOutcome::Failed {
                    error: format!("replicate prediction {} timed out", prediction.id),
                };
            }
            sleep(Duration::from_secs(2)).await;
            prediction = match self.poll_prediction(&prediction.id).await {
                Ok(p) => p,
                Err(error) => return ProviderOutcome::Failed { error },
            };
        }

        match prediction.status.as_str() {
            "succeeded" => ProviderOutcome::Succeeded {
                provider_job_id: Some(prediction.id),
                result: prediction.output.unwrap_or(serde_json::Value::Null),
            },
            _ => ProviderOutcome::Failed {
                error: prediction
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| format!("replicate prediction {} failed", prediction.id)),
            },
        }
    }
}
