pub mod audit;
pub mod budget;
pub mod candidate;
pub mod config;
pub mod cycle;
pub mod drift;
pub mod job;
pub mod notification;
pub mod outcome;
pub mod queue;
pub mod request;
pub mod stability;
pub mod version;

pub use audit::AuditEntry;
pub use budget::{AnchorDay, BudgetWindowPolicy, WeekendBudget};
pub use candidate::{
    CandidateModel, EvaluationReport, ModelMetrics, SampleError, ValidationDecision,
    ValidationResult,
};
pub use config::{
    AdmissionConfig, BackendConfig, Config, DatabaseConfig, IntakeConfig, LoggingConfig,
    NotificationsConfig, PromotionConfig, ServerConfig, TrainingConfig, ValidationConfig,
};
pub use cycle::{CycleState, TargetCycle};
pub use drift::DriftEvent;
pub use job::{JobStatus, TrainingJob};
pub use notification::{Notification, NotificationKind, NotificationSeverity};
pub use outcome::{IntakeDecision, RejectReason};
pub use queue::RequestQueue;
pub use request::{priority_for, RetrainRequest, MAX_DATA_RETRIES};
pub use stability::StabilityRecord;
pub use version::{ModelVersion, TriggerKind};
