//! Retrain request domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of times a request is re-queued after `DataNotReady`.
pub const MAX_DATA_RETRIES: u8 = 1;

/// A pending request to retrain one target.
///
/// At most one pending request exists per target; further drift events are
/// folded into it via [`RetrainRequest::coalesce`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainRequest {
    pub id: Uuid,
    pub target_id: String,
    /// Maximum severity observed across all coalesced events.
    pub trigger_severity: f64,
    /// Number of drift events folded into this request (starts at 1).
    pub coalesced_count: u32,
    pub created_at: DateTime<Utc>,
    /// Arrival time of the most recent coalesced event; anchors the debounce window.
    pub last_event_at: DateTime<Utc>,
    /// Queue priority derived from `trigger_severity`, 0-100.
    pub priority: u8,
    /// Start of the budget window the request was created in.
    pub window_start: DateTime<Utc>,
    /// How many times the request was re-queued after data was not ready.
    pub retry_count: u8,
    /// Not eligible for admission before this instant (data-readiness backoff).
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
}

impl RetrainRequest {
    pub fn new(
        target_id: impl Into<String>,
        severity: f64,
        at: DateTime<Utc>,
        window_start: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id: target_id.into(),
            trigger_severity: severity,
            coalesced_count: 1,
            created_at: at,
            last_event_at: at,
            priority: priority_for(severity),
            window_start,
            retry_count: 0,
            not_before: None,
        }
    }

    /// Fold another drift event into this request.
    pub fn coalesce(&mut self, severity: f64, at: DateTime<Utc>) {
        self.trigger_severity = self.trigger_severity.max(severity);
        self.coalesced_count += 1;
        if at > self.last_event_at {
            self.last_event_at = at;
        }
        self.priority = priority_for(self.trigger_severity);
    }

    /// Whether an event arriving at `at` falls inside this request's debounce window.
    pub fn within_debounce(&self, at: DateTime<Utc>, debounce_seconds: u64) -> bool {
        let elapsed = at.signed_duration_since(self.last_event_at);
        elapsed.num_milliseconds() < i64::try_from(debounce_seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    /// Replace this (stale) request with a fresh one that inherits its history.
    pub fn supersede(&self, severity: f64, at: DateTime<Utc>, window_start: DateTime<Utc>) -> Self {
        let mut next = Self::new(self.target_id.clone(), self.trigger_severity.max(severity), at, window_start);
        next.coalesced_count = self.coalesced_count + 1;
        next
    }

    pub fn can_retry_data(&self) -> bool {
        self.retry_count < MAX_DATA_RETRIES
    }

    /// The request re-queued after a `DataNotReady` rejection.
    pub fn deferred(&self, until: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.retry_count += 1;
        next.not_before = Some(until);
        next
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map_or(true, |t| now >= t)
    }

    /// Short identifier used in model version labels.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

/// Derive a queue priority from a severity in `[0, 1]`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn priority_for(severity: f64) -> u8 {
    (severity.clamp(0.0, 1.0) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_priority_for() {
        assert_eq!(priority_for(0.0), 0);
        assert_eq!(priority_for(0.85), 85);
        assert_eq!(priority_for(1.0), 100);
        assert_eq!(priority_for(3.0), 100);
    }

    #[test]
    fn test_coalesce_takes_max_severity() {
        let t0 = Utc::now();
        let mut req = RetrainRequest::new("lap_time", 0.9, t0, t0);
        req.coalesce(0.82, t0 + Duration::seconds(10));
        assert!((req.trigger_severity - 0.9).abs() < f64::EPSILON);
        assert_eq!(req.coalesced_count, 2);
        assert_eq!(req.priority, 90);
        assert_eq!(req.last_event_at, t0 + Duration::seconds(10));
        assert_eq!(req.created_at, t0);
    }

    #[test]
    fn test_debounce_window_boundary() {
        let t0 = Utc::now();
        let req = RetrainRequest::new("lap_time", 0.9, t0, t0);
        assert!(req.within_debounce(t0 + Duration::seconds(299), 300));
        assert!(!req.within_debounce(t0 + Duration::seconds(300), 300));
    }

    #[test]
    fn test_supersede_keeps_history() {
        let t0 = Utc::now();
        let mut req = RetrainRequest::new("lap_time", 0.95, t0, t0);
        req.coalesce(0.9, t0 + Duration::seconds(5));
        let next = req.supersede(0.8, t0 + Duration::seconds(900), t0);
        assert_ne!(next.id, req.id);
        assert_eq!(next.coalesced_count, 3);
        assert!((next.trigger_severity - 0.95).abs() < f64::EPSILON);
        assert_eq!(next.created_at, t0 + Duration::seconds(900));
    }

    #[test]
    fn test_deferred_retry_once() {
        let t0 = Utc::now();
        let req = RetrainRequest::new("lap_time", 0.9, t0, t0);
        assert!(req.can_retry_data());
        let retry = req.deferred(t0 + Duration::seconds(60));
        assert_eq!(retry.id, req.id);
        assert!(!retry.can_retry_data());
        assert!(!retry.is_eligible(t0 + Duration::seconds(59)));
        assert!(retry.is_eligible(t0 + Duration::seconds(60)));
    }
}
