//! Structured notifications emitted on every terminal transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::outcome::RejectReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Promoted,
    Rejected,
    RolledBack,
    BudgetExhausted,
    /// A pending request was dropped before admission (window rollover, retry exhausted).
    RequestDiscarded,
    Superseded,
    /// A job found unfinished at startup was force-terminated.
    JobRecovered,
    RollbackFailure,
    Unfrozen,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Promoted => "promoted",
            Self::Rejected => "rejected",
            Self::RolledBack => "rolled_back",
            Self::BudgetExhausted => "budget_exhausted",
            Self::RequestDiscarded => "request_discarded",
            Self::Superseded => "superseded",
            Self::JobRecovered => "job_recovered",
            Self::RollbackFailure => "rollback_failure",
            Self::Unfrozen => "unfrozen",
        }
    }

    pub fn default_severity(&self) -> NotificationSeverity {
        match self {
            Self::Promoted | Self::Superseded | Self::Unfrozen => NotificationSeverity::Info,
            Self::Rejected | Self::BudgetExhausted | Self::RequestDiscarded | Self::JobRecovered => {
                NotificationSeverity::Warning
            }
            Self::RolledBack => NotificationSeverity::Error,
            Self::RollbackFailure => NotificationSeverity::Critical,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for NotificationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    /// Assigned by the notification bus on publish.
    pub sequence: u64,
    pub kind: NotificationKind,
    pub severity: NotificationSeverity,
    pub target_id: String,
    pub reason: Option<RejectReason>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    pub cycle_started_at: Option<DateTime<Utc>>,
    pub request_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        target_id: impl Into<String>,
        message: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            kind,
            severity: kind.default_severity(),
            target_id: target_id.into(),
            reason: None,
            message: message.into(),
            occurred_at,
            cycle_started_at: None,
            request_id: None,
            job_id: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_reason(mut self, reason: RejectReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_request(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_cycle_start(mut self, started_at: Option<DateTime<Utc>>) -> Self {
        self.cycle_started_at = started_at;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Whether operators should be paged rather than merely informed.
    pub fn is_alert(&self) -> bool {
        self.severity >= NotificationSeverity::Error
    }
}
