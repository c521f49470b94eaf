//! Version labels for promoted models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a model was retrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Drift,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drift => "drift",
        }
    }
}

/// Deterministic label `{target}_{YYYYMMDDHHMMSS}_{trigger}_{request-short-id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelVersion {
    pub target_id: String,
    pub created_at: DateTime<Utc>,
    pub trigger: TriggerKind,
    pub trigger_id: String,
}

impl ModelVersion {
    pub fn new(
        target_id: impl Into<String>,
        created_at: DateTime<Utc>,
        trigger: TriggerKind,
        trigger_id: impl Into<String>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            created_at,
            trigger,
            trigger_id: trigger_id.into(),
        }
    }
}

impl std::fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.target_id,
            self.created_at.format("%Y%m%d%H%M%S"),
            self.trigger.as_str(),
            self.trigger_id
        )
    }
}
