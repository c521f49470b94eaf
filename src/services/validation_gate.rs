//! Validation gate: statistical comparison of a candidate against production.

use std::collections::HashMap;

use crate::domain::models::{
    EvaluationReport, RejectReason, ValidationConfig, ValidationDecision, ValidationResult,
};
use crate::services::statistics::paired_t_test;

/// Decides whether a candidate model may replace the production baseline.
///
/// A candidate is promoted only when all of these hold:
/// - both models were scored on the same evaluation samples,
/// - there are at least `min_eval_samples` of them,
/// - the relative MAE improvement reaches `improvement_threshold`,
/// - the paired t-test on absolute errors gives `p < significance_level`.
#[derive(Debug, Clone)]
pub struct ValidationGate {
    config: ValidationConfig,
}

impl ValidationGate {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// The promotion rule on already-computed statistics.
    pub fn decide(&self, n_samples: usize, delta: f64, p_value: f64) -> Result<(), RejectReason> {
        if n_samples < self.config.min_eval_samples {
            return Err(RejectReason::InsufficientEvalData);
        }
        if delta.is_nan() || p_value.is_nan() {
            return Err(RejectReason::ValidationRegression);
        }
        if delta >= self.config.improvement_threshold && p_value < self.config.significance_level {
            Ok(())
        } else {
            Err(RejectReason::ValidationRegression)
        }
    }

    /// Compare `candidate` against `baseline` and produce the gate's verdict.
    pub fn evaluate(
        &self,
        candidate_id: &str,
        baseline: Option<&EvaluationReport>,
        candidate: &EvaluationReport,
    ) -> ValidationResult {
        let mut result = ValidationResult {
            candidate_id: candidate_id.to_string(),
            baseline_metrics: baseline.map(|b| b.metrics),
            candidate_metrics: candidate.metrics,
            delta: None,
            p_value: None,
            decision: ValidationDecision::Reject,
            reject_reason: None,
        };

        let Some(baseline) = baseline else {
            result.reject_reason = Some(RejectReason::MissingBaseline);
            return result;
        };

        let n_samples = candidate.samples.len().min(baseline.samples.len());
        if n_samples < self.config.min_eval_samples {
            result.reject_reason = Some(RejectReason::InsufficientEvalData);
            return result;
        }

        let Some((baseline_abs, candidate_abs)) = pair_by_sample_id(baseline, candidate) else {
            result.reject_reason = Some(RejectReason::MismatchedEvalSet);
            return result;
        };

        if baseline.metrics.mae <= 0.0 {
            result.reject_reason = Some(RejectReason::ValidationRegression);
            return result;
        }

        let delta = (baseline.metrics.mae - candidate.metrics.mae) / baseline.metrics.mae;
        result.delta = Some(delta);

        let Some(test) = paired_t_test(&baseline_abs, &candidate_abs) else {
            result.reject_reason = Some(RejectReason::InsufficientEvalData);
            return result;
        };
        result.p_value = Some(test.p_value);

        match self.decide(baseline_abs.len(), delta, test.p_value) {
            Ok(()) => result.decision = ValidationDecision::Promote,
            Err(reason) => result.reject_reason = Some(reason),
        }
        result
    }
}

/// Absolute errors of both models aligned by sample id.
///
/// `None` unless both reports cover exactly the same set of unique sample ids.
fn pair_by_sample_id(
    baseline: &EvaluationReport,
    candidate: &EvaluationReport,
) -> Option<(Vec<f64>, Vec<f64>)> {
    if baseline.samples.len() != candidate.samples.len() {
        return None;
    }

    let mut by_id: HashMap<&str, f64> = HashMap::with_capacity(baseline.samples.len());
    for sample in &baseline.samples {
        if by_id.insert(sample.sample_id.as_str(), sample.error.abs()).is_some() {
            return None;
        }
    }

    let mut baseline_abs = Vec::with_capacity(candidate.samples.len());
    let mut candidate_abs = Vec::with_capacity(candidate.samples.len());
    for sample in &candidate.samples {
        // Removing guards against duplicate ids on the candidate side.
        let base = by_id.remove(sample.sample_id.as_str())?;
        baseline_abs.push(base);
        candidate_abs.push(sample.error.abs());
    }

    Some((baseline_abs, candidate_abs))
}
