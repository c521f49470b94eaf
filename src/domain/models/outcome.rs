//! Outcome taxonomy for intake decisions and retrain cycles.
//!
//! None of these are Rust errors: they are expected results of the control
//! loop and are surfaced through the audit log and notifications.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a retrain cycle (or a request) ended without a promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The target's dataset snapshot was not ready; retried once.
    DataNotReady,
    /// The target's retrain cap for the current window is used up.
    BudgetExhausted,
    /// The request was created in a budget window that has since closed.
    WindowRolledOver,
    /// The training job reported failure.
    TrainingFailure,
    /// The training job exceeded the maximum duration.
    TimedOut,
    /// Too few evaluation samples to judge the candidate.
    InsufficientEvalData,
    /// Candidate and baseline were evaluated on different samples.
    MismatchedEvalSet,
    /// No significant improvement over the baseline.
    ValidationRegression,
    /// No baseline exists to compare against.
    MissingBaseline,
    /// A newer drift event replaced the pending request.
    Superseded,
    /// Promotions for the target are frozen after a rollback failure.
    PromotionFrozen,
    /// An external collaborator failed outside the job itself.
    CollaboratorError,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataNotReady => "data_not_ready",
            Self::BudgetExhausted => "budget_exhausted",
            Self::WindowRolledOver => "window_rolled_over",
            Self::TrainingFailure => "training_failure",
            Self::TimedOut => "timed_out",
            Self::InsufficientEvalData => "insufficient_eval_data",
            Self::MismatchedEvalSet => "mismatched_eval_set",
            Self::ValidationRegression => "validation_regression",
            Self::MissingBaseline => "missing_baseline",
            Self::Superseded => "superseded",
            Self::PromotionFrozen => "promotion_frozen",
            Self::CollaboratorError => "collaborator_error",
        }
    }

    /// Whether the underlying condition is expected to clear on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DataNotReady | Self::BudgetExhausted | Self::WindowRolledOver | Self::Superseded
        )
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the intake did with one drift event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum IntakeDecision {
    /// Severity below the configured threshold.
    Ignored,
    /// Folded into the pending request.
    Coalesced { request_id: Uuid },
    /// Dropped because the target finished a cycle recently or is mid-cycle.
    InCooldown,
    /// A new request was created and queued.
    Accepted { request_id: Uuid },
    /// A stale pending request was canceled and replaced by a new one.
    Superseded { request_id: Uuid, replaced: Uuid },
}

impl IntakeDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Coalesced { .. } => "coalesced",
            Self::InCooldown => "in_cooldown",
            Self::Accepted { .. } => "accepted",
            Self::Superseded { .. } => "superseded",
        }
    }

    /// The request the event ended up in, if any.
    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            Self::Coalesced { request_id }
            | Self::Accepted { request_id }
            | Self::Superseded { request_id, .. } => Some(*request_id),
            Self::Ignored | Self::InCooldown => None,
        }
    }
}
