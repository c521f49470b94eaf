//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber, with rolling
//! file output and append-only JSONL trails for audit entries and
//! notifications.

pub mod audit;
pub mod config;
pub mod logger;

pub use audit::{AuditLogger, JsonlNotificationLog};
pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::{LoggerError, LoggerImpl};
