//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces that adapters implement:
//! - Repositories for stability records, budgets and training jobs
//! - Collaborators: data readiness, job runner, model registry, evaluator, health check
//! - Notification channel and audit log sinks
//! - Clock

pub mod audit_log;
pub mod budget_repository;
pub mod clock;
pub mod collaborators;
pub mod job_repository;
pub mod notification_channel;
pub mod stability_repository;

pub use audit_log::AuditLog;
pub use budget_repository::BudgetRepository;
pub use clock::{Clock, SystemClock};
pub use collaborators::{
    DataReadiness, DataSnapshot, HealthCheck, JobReport, JobRunner, JobSpec, ModelEvaluator,
    ModelRegistry,
};
pub use job_repository::JobRepository;
pub use notification_channel::NotificationChannel;
pub use stability_repository::StabilityRepository;
