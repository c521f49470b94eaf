//! Candidate models, evaluation reports and validation results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::outcome::RejectReason;

/// Aggregate error metrics over an evaluation set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub n_samples: usize,
}

/// Residual of one model on one evaluation sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleError {
    pub sample_id: String,
    /// Signed residual (prediction minus truth).
    pub error: f64,
}

/// Result of evaluating one artifact on a held-out evaluation set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub artifact_ref: String,
    pub metrics: ModelMetrics,
    pub samples: Vec<SampleError>,
}

impl EvaluationReport {
    /// Build a report from per-sample residuals, computing MAE and RMSE.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_residuals(artifact_ref: impl Into<String>, samples: Vec<SampleError>) -> Self {
        let n = samples.len();
        let (abs_sum, sq_sum) = samples
            .iter()
            .fold((0.0, 0.0), |(a, s), e| (a + e.error.abs(), s + e.error * e.error));
        let (mae, rmse) = if n == 0 {
            (0.0, 0.0)
        } else {
            (abs_sum / n as f64, (sq_sum / n as f64).sqrt())
        };

        Self {
            artifact_ref: artifact_ref.into(),
            metrics: ModelMetrics {
                mae,
                rmse,
                n_samples: n,
            },
            samples,
        }
    }
}

/// A model produced by a successful training job, awaiting validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateModel {
    /// Identifier assigned by the model registry.
    pub candidate_id: String,
    pub job_id: Uuid,
    pub metrics: ModelMetrics,
    pub artifact_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationDecision {
    Promote,
    Reject,
}

/// Outcome of comparing a candidate against the production baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub candidate_id: String,
    pub baseline_metrics: Option<ModelMetrics>,
    pub candidate_metrics: ModelMetrics,
    /// Relative MAE improvement, `(baseline - candidate) / baseline`.
    pub delta: Option<f64>,
    /// Two-sided p-value of the paired test on per-sample errors.
    pub p_value: Option<f64>,
    pub decision: ValidationDecision,
    pub reject_reason: Option<RejectReason>,
}

impl ValidationResult {
    pub fn is_promote(&self) -> bool {
        self.decision == ValidationDecision::Promote
    }
}
