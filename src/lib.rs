//! driftloop - drift-triggered retraining orchestrator
//!
//! driftloop turns drift signals into bounded, validated retraining cycles.
//! Drift events are debounced into at most one pending request per target,
//! admitted against a per-window retrain budget and a global concurrency
//! ceiling, trained on an external backend, and promoted only when the
//! candidate beats production by a statistically significant margin. A
//! promoted model is watched through a grace period and rolled back to the
//! previous stable model when serving health degrades.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): intake, admission, validation gate,
//!   promotion controller and the orchestrator state machine
//! - **Adapters** (`adapters`): sqlite persistence, HTTP backend, axum ingress, mocks
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use driftloop::adapters::mock::{ManualClock, MemoryAuditLog, MockBackend};
//! use driftloop::adapters::sqlite::create_migrated_test_pool;
//! use driftloop::{Config, DriftEvent, NotificationBus, Orchestrator};
//!
//! let pool = create_migrated_test_pool().await?;
//! let ports = MockBackend::new().ports(pool, Arc::new(MemoryAuditLog::default()), Arc::new(ManualClock::default()));
//! let orchestrator = Orchestrator::new(Config::default(), ports, Arc::new(NotificationBus::default()));
//! orchestrator.submit_event(DriftEvent::new("lap_time", 0.9, chrono::Utc::now())).await?;
//! orchestrator.dispatch_pending().await;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult, IngressError};
pub use domain::models::{
    Config, CycleState, DriftEvent, IntakeDecision, Notification, NotificationKind, RejectReason,
    RetrainRequest, StabilityRecord, TrainingJob, WeekendBudget,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{NotificationBus, Orchestrator, OrchestratorError, OrchestratorPorts};
