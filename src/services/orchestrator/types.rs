//! Public types of the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::domain::errors::{DomainError, IngressError};
use crate::domain::models::{
    RequestQueue, RetrainRequest, StabilityRecord, TargetCycle, TrainingJob, WeekendBudget,
};
use crate::domain::ports::{
    AuditLog, BudgetRepository, Clock, DataReadiness, HealthCheck, JobRepository, JobRunner,
    ModelEvaluator, ModelRegistry, StabilityRepository,
};
use crate::services::promotion::PromotionError;

/// Everything the orchestrator talks to.
#[derive(Clone)]
pub struct OrchestratorPorts {
    pub stability: Arc<dyn StabilityRepository>,
    pub budgets: Arc<dyn BudgetRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub data: Arc<dyn DataReadiness>,
    pub runner: Arc<dyn JobRunner>,
    pub registry: Arc<dyn ModelRegistry>,
    pub evaluator: Arc<dyn ModelEvaluator>,
    pub health: Arc<dyn HealthCheck>,
    pub audit: Arc<dyn AuditLog>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid drift event: {0}")]
    InvalidEvent(#[from] IngressError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Promotion(#[from] PromotionError),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Operator view of one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub target_id: String,
    pub cycle: TargetCycle,
    pub pending_request: Option<RetrainRequest>,
    pub stability: Option<StabilityRecord>,
    pub budget: WeekendBudget,
    pub recent_jobs: Vec<TrainingJob>,
}

/// Process-wide counters for the health endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OrchestratorHealth {
    pub queued_requests: usize,
    pub in_flight_cycles: usize,
    pub available_slots: usize,
    pub concurrency_ceiling: usize,
}

/// Request queue and per-target cycle states, guarded by one lock so the
/// one-pending-request invariant and cycle transitions never interleave.
#[derive(Debug, Default)]
pub(crate) struct Board {
    pub(crate) queue: RequestQueue,
    pub(crate) cycles: HashMap<String, TargetCycle>,
}
