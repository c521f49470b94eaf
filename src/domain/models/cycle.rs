//! Per-target retrain cycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::outcome::RejectReason;
use crate::domain::errors::DomainError;

/// Where a target is in its retrain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    /// No pending request and nothing in flight
    #[default]
    Idle,
    /// A qualifying drift event arrived
    Triggered,
    /// A retrain request waits in the queue
    Queued,
    /// Budget consumed and a resource slot granted
    Admitted,
    /// The training job is executing
    Training,
    /// The candidate is being compared against production
    Validating,
    /// The candidate became production; health is being watched
    Promoted,
    /// The cycle ended without a promotion
    Rejected,
    /// Production is being restored after a failed health check
    RollingBack,
    /// Production was restored to the previous stable model
    RolledBack,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Triggered => "triggered",
            Self::Queued => "queued",
            Self::Admitted => "admitted",
            Self::Training => "training",
            Self::Validating => "validating",
            Self::Promoted => "promoted",
            Self::Rejected => "rejected",
            Self::RollingBack => "rolling_back",
            Self::RolledBack => "rolled_back",
        }
    }

    /// Whether the cycle has ended and only the return to `Idle` remains.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Promoted | Self::Rejected | Self::RolledBack)
    }

    /// Whether budget and a slot were consumed and the cycle has not yet ended.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Admitted | Self::Training | Self::Validating | Self::Promoted | Self::RollingBack
        )
    }

    pub fn valid_transitions(&self) -> Vec<CycleState> {
        match self {
            Self::Idle => vec![Self::Triggered],
            Self::Triggered => vec![Self::Queued, Self::Idle],
            // Queued -> Rejected covers budget exhaustion and window rollover;
            // Queued -> Idle covers cancellation when a request is superseded.
            Self::Queued => vec![Self::Admitted, Self::Rejected, Self::Idle],
            Self::Admitted => vec![Self::Training, Self::Rejected],
            Self::Training => vec![Self::Validating, Self::Rejected],
            Self::Validating => vec![Self::Promoted, Self::Rejected],
            Self::Promoted => vec![Self::RollingBack, Self::Idle],
            Self::Rejected => vec![Self::Idle, Self::Queued],
            Self::RollingBack => vec![Self::RolledBack, Self::Idle],
            Self::RolledBack => vec![Self::Idle],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live cycle state of one target, kept in memory by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetCycle {
    pub target_id: String,
    pub state: CycleState,
    pub request_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    /// When the current cycle was triggered.
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Reason attached to the most recent `Rejected` transition.
    pub last_reason: Option<RejectReason>,
    /// End of the most recent cycle whose job started training. Survives
    /// the return to `Idle` so cooldown holds before the store catches up.
    #[serde(default)]
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl TargetCycle {
    pub fn idle(target_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            target_id: target_id.into(),
            state: CycleState::Idle,
            request_id: None,
            job_id: None,
            started_at: None,
            updated_at: at,
            last_reason: None,
            last_completed_at: None,
        }
    }

    pub fn transition_to(&mut self, next: CycleState, at: DateTime<Utc>) -> Result<CycleState, DomainError> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                target_id: self.target_id.clone(),
                from: self.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        let previous = self.state;
        self.state = next;
        self.updated_at = at;
        match next {
            CycleState::Triggered => {
                self.started_at = Some(at);
                self.last_reason = None;
            }
            CycleState::Idle => {
                self.request_id = None;
                self.job_id = None;
                self.started_at = None;
            }
            _ => {}
        }
        Ok(previous)
    }

    /// Stamp the end of a cycle that trained, for cooldown.
    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        self.last_completed_at = Some(at);
    }

    pub fn reject(&mut self, reason: RejectReason, at: DateTime<Utc>) -> Result<CycleState, DomainError> {
        let previous = self.transition_to(CycleState::Rejected, at)?;
        self.last_reason = Some(reason);
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let now = Utc::now();
        let mut cycle = TargetCycle::idle("lap_time", now);
        for state in [
            CycleState::Triggered,
            CycleState::Queued,
            CycleState::Admitted,
            CycleState::Training,
            CycleState::Validating,
            CycleState::Promoted,
            CycleState::Idle,
        ] {
            cycle.transition_to(state, now).unwrap();
        }
        assert_eq!(cycle.state, CycleState::Idle);
        assert!(cycle.started_at.is_none());
    }

    #[test]
    fn test_rollback_path() {
        let now = Utc::now();
        let mut cycle = TargetCycle::idle("lap_time", now);
        cycle.state = CycleState::Promoted;
        cycle.transition_to(CycleState::RollingBack, now).unwrap();
        cycle.transition_to(CycleState::RolledBack, now).unwrap();
        assert!(cycle.state.is_terminal());
        cycle.transition_to(CycleState::Idle, now).unwrap();
    }

    #[test]
    fn test_cannot_skip_validation() {
        let now = Utc::now();
        let mut cycle = TargetCycle::idle("lap_time", now);
        cycle.state = CycleState::Training;
        let err = cycle.transition_to(CycleState::Promoted, now).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(cycle.state, CycleState::Training);
    }

    #[test]
    fn test_reject_records_reason() {
        let now = Utc::now();
        let mut cycle = TargetCycle::idle("lap_time", now);
        cycle.state = CycleState::Admitted;
        cycle.reject(RejectReason::DataNotReady, now).unwrap();
        assert_eq!(cycle.last_reason, Some(RejectReason::DataNotReady));
        // DataNotReady re-queues once.
        cycle.transition_to(CycleState::Queued, now).unwrap();
    }

    #[test]
    fn test_in_flight_states() {
        assert!(CycleState::Training.is_in_flight());
        assert!(!CycleState::Queued.is_in_flight());
        assert!(!CycleState::Idle.is_in_flight());
    }

    #[test]
    fn test_completion_stamp_survives_idle() {
        let now = Utc::now();
        let mut cycle = TargetCycle::idle("lap_time", now);
        cycle.state = CycleState::Promoted;
        cycle.mark_completed(now);
        cycle.transition_to(CycleState::Idle, now).unwrap();
        assert_eq!(cycle.last_completed_at, Some(now));
        assert!(cycle.job_id.is_none());
    }
}
