//! Stability record: which artifact serves a target now, and which served before.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable pointer to the current and immediately prior production model.
///
/// Only one step of history is kept, so a rollback is a single swap and can
/// never cascade further back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityRecord {
    pub target_id: String,
    pub current_production_ref: String,
    pub previous_stable_ref: Option<String>,
    /// When `current_production_ref` became production; `None` for the original baseline.
    pub promoted_at: Option<DateTime<Utc>>,
    /// Promotions are blocked while set (after a failed rollback).
    pub frozen: bool,
    pub frozen_reason: Option<String>,
}

impl StabilityRecord {
    /// Record for a target whose original baseline was never promoted by us.
    pub fn baseline(target_id: impl Into<String>, production_ref: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            current_production_ref: production_ref.into(),
            previous_stable_ref: None,
            promoted_at: None,
            frozen: false,
            frozen_reason: None,
        }
    }

    /// The record after promoting `new_ref`.
    pub fn promoted(&self, new_ref: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            target_id: self.target_id.clone(),
            current_production_ref: new_ref.into(),
            previous_stable_ref: Some(self.current_production_ref.clone()),
            promoted_at: Some(at),
            frozen: self.frozen,
            frozen_reason: self.frozen_reason.clone(),
        }
    }

    /// The record after undoing the most recent promotion, if there is one.
    pub fn rolled_back(&self, at: DateTime<Utc>) -> Option<Self> {
        let previous = self.previous_stable_ref.clone()?;
        Some(Self {
            target_id: self.target_id.clone(),
            current_production_ref: previous,
            previous_stable_ref: None,
            promoted_at: Some(at),
            frozen: self.frozen,
            frozen_reason: self.frozen_reason.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote_shifts_current_into_previous() {
        let base = StabilityRecord::baseline("lap_time", "models:/lap_time/1");
        let now = Utc::now();
        let next = base.promoted("models:/lap_time/2", now);
        assert_eq!(next.current_production_ref, "models:/lap_time/2");
        assert_eq!(next.previous_stable_ref.as_deref(), Some("models:/lap_time/1"));
        assert_eq!(next.promoted_at, Some(now));
    }

    #[test]
    fn test_rollback_restores_exactly_previous() {
        let now = Utc::now();
        let record = StabilityRecord::baseline("lap_time", "v1")
            .promoted("v2", now)
            .promoted("v3", now);
        let rolled = record.rolled_back(now).unwrap();
        assert_eq!(rolled.current_production_ref, "v2");
        assert!(rolled.previous_stable_ref.is_none());
    }

    #[test]
    fn test_rollback_never_cascades() {
        let now = Utc::now();
        let record = StabilityRecord::baseline("lap_time", "v1").promoted("v2", now);
        let rolled = record.rolled_back(now).unwrap();
        assert_eq!(rolled.current_production_ref, "v1");
        assert!(rolled.rolled_back(now).is_none());
    }

    #[test]
    fn test_baseline_cannot_roll_back() {
        assert!(StabilityRecord::baseline("t", "v1").rolled_back(Utc::now()).is_none());
    }
}
