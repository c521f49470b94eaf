//! Infrastructure layer module
//!
//! - Configuration management (figment)
//! - Logging infrastructure (tracing) and JSONL audit trails

pub mod config;
pub mod logging;
