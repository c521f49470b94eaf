//! Domain layer for the driftloop retraining orchestrator
//!
//! This module contains core business logic, domain models and port traits.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult, FieldViolation, IngressError};
