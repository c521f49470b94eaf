//! Drift event domain model.
//!
//! Drift events are produced by an external detector and consumed exactly
//! once by the intake. They are immutable once accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::errors::{FieldViolation, IngressError};

/// A severity-scored signal that a target's input or output distribution shifted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEvent {
    /// Identifier of the retraining target (one served model).
    pub target_id: String,
    /// Drift severity in `[0.0, 1.0]`.
    pub severity: f64,
    /// When the detector observed the drift.
    pub detected_at: DateTime<Utc>,
    /// Per-feature drift scores, informational only.
    #[serde(default)]
    pub feature_breakdown: BTreeMap<String, f64>,
}

impl DriftEvent {
    pub fn new(target_id: impl Into<String>, severity: f64, detected_at: DateTime<Utc>) -> Self {
        Self {
            target_id: target_id.into(),
            severity,
            detected_at,
            feature_breakdown: BTreeMap::new(),
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>, score: f64) -> Self {
        self.feature_breakdown.insert(feature.into(), score);
        self
    }

    /// Validate the payload, collecting every violation rather than the first.
    pub fn validate(&self) -> Result<(), IngressError> {
        let mut violations = Vec::new();

        if self.target_id.trim().is_empty() {
            violations.push(FieldViolation {
                field: "target_id".to_string(),
                message: "must not be empty".to_string(),
            });
        } else if self.target_id.len() > 128 {
            violations.push(FieldViolation {
                field: "target_id".to_string(),
                message: "must be at most 128 characters".to_string(),
            });
        }

        if !self.severity.is_finite() || !(0.0..=1.0).contains(&self.severity) {
            violations.push(FieldViolation {
                field: "severity".to_string(),
                message: format!("must be a number within [0, 1], got {}", self.severity),
            });
        }

        for (feature, score) in &self.feature_breakdown {
            if !score.is_finite() {
                violations.push(FieldViolation {
                    field: format!("feature_breakdown.{feature}"),
                    message: "must be a finite number".to_string(),
                });
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(IngressError { violations })
        }
    }

    /// Parse and validate a raw JSON payload.
    pub fn from_json(raw: &str) -> Result<Self, IngressError> {
        let event: Self = serde_json::from_str(raw)
            .map_err(|e| IngressError::single("body", e.to_string()))?;
        event.validate()?;
        Ok(event)
    }
}
