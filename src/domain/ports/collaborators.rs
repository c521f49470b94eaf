//! Narrow interfaces to the external systems the orchestrator drives.
//!
//! Dataset assembly, model fitting, artifact storage and serving health all
//! live outside this crate. Each is reached through one of these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{EvaluationReport, JobStatus, ModelMetrics};

/// Readiness of a target's training data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSnapshot {
    pub ready: bool,
    /// Reference to the latest usable dataset snapshot, when ready.
    pub dataset_ref: Option<String>,
}

impl DataSnapshot {
    pub fn ready(dataset_ref: impl Into<String>) -> Self {
        Self {
            ready: true,
            dataset_ref: Some(dataset_ref.into()),
        }
    }

    pub fn not_ready() -> Self {
        Self {
            ready: false,
            dataset_ref: None,
        }
    }

    /// The dataset reference if the snapshot can be trained on.
    pub fn usable_ref(&self) -> Option<&str> {
        if self.ready {
            self.dataset_ref.as_deref()
        } else {
            None
        }
    }
}

#[async_trait]
pub trait DataReadiness: Send + Sync {
    async fn is_ready(&self, target_id: &str) -> DomainResult<DataSnapshot>;
}

/// What the runner needs to start one training job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_id: Uuid,
    pub target_id: String,
    pub dataset_ref: String,
    pub warm_start_ref: Option<String>,
}

/// Status of a job as observed by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub status: JobStatus,
    #[serde(default)]
    pub metrics: Option<ModelMetrics>,
    #[serde(default)]
    pub artifact_ref: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl JobReport {
    pub fn running() -> Self {
        Self {
            status: JobStatus::Running,
            metrics: None,
            artifact_ref: None,
            message: None,
        }
    }

    pub fn succeeded(artifact_ref: impl Into<String>, metrics: ModelMetrics) -> Self {
        Self {
            status: JobStatus::Succeeded,
            metrics: Some(metrics),
            artifact_ref: Some(artifact_ref.into()),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            metrics: None,
            artifact_ref: None,
            message: Some(message.into()),
        }
    }
}

/// The external training execution environment.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Start a job and return the runner's identifier for it.
    async fn submit(&self, spec: &JobSpec) -> DomainResult<String>;

    async fn poll(&self, external_id: &str) -> DomainResult<JobReport>;
}

/// Durable store of model artifacts and the production stage.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// The artifact currently serving `target_id`, if any.
    async fn get_production(&self, target_id: &str) -> DomainResult<Option<String>>;

    /// Register a trained artifact and return its candidate id.
    async fn register(
        &self,
        target_id: &str,
        artifact_ref: &str,
        metrics: &ModelMetrics,
        version_label: &str,
    ) -> DomainResult<String>;

    /// Move `artifact_ref` into the production stage for `target_id`.
    async fn set_production(&self, target_id: &str, artifact_ref: &str) -> DomainResult<()>;
}

/// Scores an artifact on the held-out evaluation set of a dataset snapshot.
#[async_trait]
pub trait ModelEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        target_id: &str,
        artifact_ref: &str,
        dataset_ref: &str,
    ) -> DomainResult<EvaluationReport>;
}

/// Post-deployment health signal of the serving component.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, target_id: &str) -> DomainResult<bool>;
}
