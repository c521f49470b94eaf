//! reqwest client for the external training backend.
//!
//! One REST service answers for data readiness, job execution, the model
//! registry, evaluation and serving health. Every failure surfaces as
//! [`DomainError::CollaboratorFailed`] naming the port that failed.

use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{BackendConfig, EvaluationReport, JobStatus, ModelMetrics, SampleError};
use crate::domain::ports::{
    DataReadiness, DataSnapshot, HealthCheck, JobReport, JobRunner, JobSpec, ModelEvaluator,
    ModelRegistry,
};

/// Transport-level failure talking to the backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend URL '{0}'")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("backend sent unknown job status '{0}'")]
    UnknownJobStatus(String),
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    status: String,
    #[serde(default)]
    metrics: Option<ModelMetrics>,
    #[serde(default)]
    artifact_ref: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProductionBody {
    artifact_ref: String,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    target_id: &'a str,
    artifact_ref: &'a str,
    metrics: &'a ModelMetrics,
    version_label: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    candidate_id: String,
}

#[derive(Debug, Serialize)]
struct EvaluationRequest<'a> {
    target_id: &'a str,
    artifact_ref: &'a str,
    dataset_ref: &'a str,
}

#[derive(Debug, Deserialize)]
struct EvaluationResponse {
    samples: Vec<SampleError>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    healthy: bool,
}

/// HTTP implementation of every collaborator port.
#[derive(Clone)]
pub struct HttpBackend {
    client: ReqwestClient,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|_| BackendError::InvalidUrl(config.base_url.clone()))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(config.base_url.clone()));
        }

        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, base_url })
    }

    /// Append percent-encoded path segments to the base URL.
    fn url(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<reqwest::Response, BackendError> {
        let url = self.url(segments)?;
        debug!(%method, %url, "backend request");

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn expect_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }
        Ok(response.json().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, BackendError> {
        let response = self.send::<()>(Method::GET, segments, None).await?;
        Self::expect_json(response).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T, BackendError> {
        let response = self.send(Method::POST, segments, Some(body)).await?;
        Self::expect_json(response).await
    }
}

fn collaborator(name: &'static str) -> impl Fn(BackendError) -> DomainError {
    move |e| DomainError::collaborator(name, e.to_string())
}

#[async_trait]
impl DataReadiness for HttpBackend {
    async fn is_ready(&self, target_id: &str) -> DomainResult<DataSnapshot> {
        self.get_json(&["targets", target_id, "readiness"])
            .await
            .map_err(collaborator("data_readiness"))
    }
}

#[async_trait]
impl JobRunner for HttpBackend {
    async fn submit(&self, spec: &JobSpec) -> DomainResult<String> {
        let response: SubmitResponse = self
            .post_json(&["jobs"], spec)
            .await
            .map_err(collaborator("job_runner"))?;
        Ok(response.job_id)
    }

    async fn poll(&self, external_id: &str) -> DomainResult<JobReport> {
        let response: PollResponse = self
            .get_json(&["jobs", external_id])
            .await
            .map_err(collaborator("job_runner"))?;

        let status = JobStatus::from_str(&response.status)
            .ok_or_else(|| collaborator("job_runner")(BackendError::UnknownJobStatus(response.status.clone())))?;

        Ok(JobReport {
            status,
            metrics: response.metrics,
            artifact_ref: response.artifact_ref,
            message: response.message,
        })
    }
}

#[async_trait]
impl ModelRegistry for HttpBackend {
    async fn get_production(&self, target_id: &str) -> DomainResult<Option<String>> {
        let response = self
            .send::<()>(Method::GET, &["targets", target_id, "production"], None)
            .await
            .map_err(collaborator("model_registry"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: ProductionBody = Self::expect_json(response)
            .await
            .map_err(collaborator("model_registry"))?;
        Ok(Some(body.artifact_ref))
    }

    async fn register(
        &self,
        target_id: &str,
        artifact_ref: &str,
        metrics: &ModelMetrics,
        version_label: &str,
    ) -> DomainResult<String> {
        let request = RegisterRequest {
            target_id,
            artifact_ref,
            metrics,
            version_label,
        };
        let response: RegisterResponse = self
            .post_json(&["models"], &request)
            .await
            .map_err(collaborator("model_registry"))?;
        Ok(response.candidate_id)
    }

    async fn set_production(&self, target_id: &str, artifact_ref: &str) -> DomainResult<()> {
        let body = ProductionBody {
            artifact_ref: artifact_ref.to_string(),
        };
        let response = self
            .send(Method::PUT, &["targets", target_id, "production"], Some(&body))
            .await
            .map_err(collaborator("model_registry"))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(collaborator("model_registry")(BackendError::Status { status, body }))
        }
    }
}

#[async_trait]
impl ModelEvaluator for HttpBackend {
    async fn evaluate(
        &self,
        target_id: &str,
        artifact_ref: &str,
        dataset_ref: &str,
    ) -> DomainResult<EvaluationReport> {
        let request = EvaluationRequest {
            target_id,
            artifact_ref,
            dataset_ref,
        };
        let response: EvaluationResponse = self
            .post_json(&["evaluations"], &request)
            .await
            .map_err(collaborator("model_evaluator"))?;

        // Metrics are recomputed locally so both sides of the gate agree on them.
        Ok(EvaluationReport::from_residuals(artifact_ref, response.samples))
    }
}

#[async_trait]
impl HealthCheck for HttpBackend {
    async fn check(&self, target_id: &str) -> DomainResult<bool> {
        let response: HealthResponse = self
            .get_json(&["targets", target_id, "health"])
            .await
            .map_err(collaborator("health_check"))?;
        Ok(response.healthy)
    }
}
