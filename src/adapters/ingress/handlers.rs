//! Request handlers and error mapping for the ingress router.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, FieldViolation};
use crate::domain::models::{DriftEvent, IntakeDecision, StabilityRecord};
use crate::services::promotion::PromotionError;
use crate::services::{Orchestrator, OrchestratorError, OrchestratorHealth, TargetStatus};

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<FieldViolation>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, error: impl ToString) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.to_string(),
                code,
                violations: Vec::new(),
            },
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::InvalidEvent(e) => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                body: ErrorResponse {
                    error: e.to_string(),
                    code: "INVALID_EVENT",
                    violations: e.violations,
                },
            },
            OrchestratorError::UnknownTarget(target) => Self::new(
                StatusCode::NOT_FOUND,
                "UNKNOWN_TARGET",
                format!("no stability record for target {target}"),
            ),
            OrchestratorError::Promotion(e) => match e {
                PromotionError::NothingToRollBack(_) => {
                    Self::new(StatusCode::CONFLICT, "NOTHING_TO_ROLL_BACK", e)
                }
                PromotionError::Conflict(_) => {
                    Self::new(StatusCode::CONFLICT, "PROMOTION_CONFLICT", e)
                }
                PromotionError::Frozen { .. } => {
                    Self::new(StatusCode::CONFLICT, "PROMOTION_FROZEN", e)
                }
                PromotionError::Registry(_) => {
                    Self::new(StatusCode::BAD_GATEWAY, "REGISTRY_ERROR", e)
                }
                PromotionError::Store(_) => {
                    Self::new(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", e)
                }
            },
            OrchestratorError::Domain(e @ DomainError::CollaboratorFailed { .. }) => {
                Self::new(StatusCode::BAD_GATEWAY, "COLLABORATOR_ERROR", e)
            }
            OrchestratorError::Domain(e) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, code = self.body.code, error = %self.body.error, "ingress request failed");
        }
        (self.status, Json(self.body)).into_response()
    }
}

pub(super) async fn health(State(orchestrator): State<Orchestrator>) -> Json<OrchestratorHealth> {
    Json(orchestrator.health().await)
}

/// The body is taken raw so that malformed JSON yields the same structured
/// 422 as a well-formed payload with invalid fields.
pub(super) async fn submit_drift_event(
    State(orchestrator): State<Orchestrator>,
    body: String,
) -> Result<(StatusCode, Json<IntakeDecision>), ApiError> {
    let event = DriftEvent::from_json(&body).map_err(OrchestratorError::from)?;
    let decision = orchestrator.submit_event(event).await?;
    debug!(decision = decision.as_str(), "drift event accepted by ingress");
    Ok((StatusCode::ACCEPTED, Json(decision)))
}

pub(super) async fn target_status(
    State(orchestrator): State<Orchestrator>,
    Path(target_id): Path<String>,
) -> Result<Json<TargetStatus>, ApiError> {
    Ok(Json(orchestrator.target_status(&target_id).await?))
}

pub(super) async fn rollback(
    State(orchestrator): State<Orchestrator>,
    Path(target_id): Path<String>,
) -> Result<Json<StabilityRecord>, ApiError> {
    Ok(Json(orchestrator.rollback_target(&target_id).await?))
}

pub(super) async fn unfreeze(
    State(orchestrator): State<Orchestrator>,
    Path(target_id): Path<String>,
) -> Result<Json<StabilityRecord>, ApiError> {
    Ok(Json(orchestrator.unfreeze_target(&target_id).await?))
}
