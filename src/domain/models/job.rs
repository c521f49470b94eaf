//! Training job domain model.
//!
//! Jobs are created by the orchestrator at admission time and only ever
//! advanced by it; the job runner merely reports the status it observes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainError;

/// Status of a training job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Admitted and budgeted, not yet submitted to the runner
    #[default]
    Queued,
    /// Submitted and executing in the external environment
    Running,
    /// Finished and produced an artifact
    Succeeded,
    /// Finished without a usable artifact
    Failed,
    /// Exceeded the maximum training duration
    TimedOut,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" | "pending" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" | "success" | "completed" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "timed_out" | "timeout" => Some(Self::TimedOut),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    pub fn valid_transitions(&self) -> Vec<JobStatus> {
        match self {
            Self::Queued => vec![Self::Running, Self::Failed, Self::TimedOut],
            Self::Running => vec![Self::Succeeded, Self::Failed, Self::TimedOut],
            Self::Succeeded | Self::Failed | Self::TimedOut => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retraining execution for a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: Uuid,
    pub target_id: String,
    /// The retrain request this job was admitted for.
    pub request_id: Uuid,
    /// Identifier assigned by the job runner once submitted.
    pub external_id: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    /// When the whole retrain cycle ended; drives the intake cooldown.
    pub cycle_completed_at: Option<DateTime<Utc>>,
}

impl TrainingJob {
    pub fn new(target_id: impl Into<String>, request_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id: target_id.into(),
            request_id,
            external_id: None,
            status: JobStatus::Queued,
            created_at: at,
            started_at: None,
            finished_at: None,
            failure_reason: None,
            cycle_completed_at: None,
        }
    }

    pub fn transition_to(&mut self, new_status: JobStatus, at: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_transition_to(new_status) {
            return Err(DomainError::InvalidStateTransition {
                target_id: self.target_id.clone(),
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        self.status = new_status;
        match new_status {
            JobStatus::Running => self.started_at = Some(at),
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut => {
                self.finished_at = Some(at);
            }
            JobStatus::Queued => {}
        }
        Ok(())
    }

    /// Mark the job as started in the runner under `external_id`.
    pub fn start(&mut self, external_id: impl Into<String>, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(JobStatus::Running, at)?;
        self.external_id = Some(external_id.into());
        Ok(())
    }

    /// Move to a failure status, keeping the reason for audit.
    pub fn fail(&mut self, status: JobStatus, reason: impl Into<String>, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(status, at)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
