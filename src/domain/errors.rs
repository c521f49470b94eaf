//! Domain errors for the driftloop orchestrator.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the orchestrator.
///
/// These are genuine failures (storage, collaborators, programming errors).
/// Expected outcomes such as a debounced drift event or a rejected candidate
/// are modelled by [`RejectReason`](super::models::RejectReason) instead.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Training job not found: {0}")]
    JobNotFound(Uuid),

    #[error("No stability record for target: {0}")]
    StabilityRecordNotFound(String),

    #[error("Invalid state transition from {from} to {to} for target {target_id}")]
    InvalidStateTransition {
        target_id: String,
        from: String,
        to: String,
    },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("External collaborator '{collaborator}' failed: {message}")]
    CollaboratorFailed {
        collaborator: &'static str,
        message: String,
    },

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Shorthand for a failure reported by an external collaborator.
    pub fn collaborator(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::CollaboratorFailed {
            collaborator,
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

/// A single field-level problem found in an ingress payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// Structured rejection of a malformed drift payload.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Malformed drift event: {}", format_violations(.violations))]
pub struct IngressError {
    pub violations: Vec<FieldViolation>,
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl IngressError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![FieldViolation {
                field: field.into(),
                message: message.into(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingress_error_display_lists_every_field() {
        let err = IngressError {
            violations: vec![
                FieldViolation {
                    field: "severity".to_string(),
                    message: "must be within [0, 1]".to_string(),
                },
                FieldViolation {
                    field: "target_id".to_string(),
                    message: "must not be empty".to_string(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("severity: must be within [0, 1]"));
        assert!(text.contains("target_id: must not be empty"));
    }

    #[test]
    fn test_collaborator_error_message() {
        let err = DomainError::collaborator("job_runner", "connection refused");
        assert_eq!(
            err.to_string(),
            "External collaborator 'job_runner' failed: connection refused"
        );
    }
}
