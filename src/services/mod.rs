//! Service layer: the control loop built on the domain ports.

pub mod admission;
pub mod intake;
pub mod notification_bus;
pub mod orchestrator;
pub mod promotion;
pub mod statistics;
pub mod validation_gate;

pub use admission::{Admission, AdmissionController, AdmissionOutcome};
pub use intake::{DriftIntake, IntakeOutcome};
pub use notification_bus::{NotificationBus, NotificationBusConfig};
pub use orchestrator::{
    Orchestrator, OrchestratorError, OrchestratorHealth, OrchestratorPorts, OrchestratorResult,
    TargetStatus,
};
pub use promotion::{PromotionController, PromotionError};
pub use statistics::{paired_t_test, PairedTest};
pub use validation_gate::ValidationGate;
