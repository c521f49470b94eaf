//! Adapters implementing the domain ports.
//!
//! - `sqlite`: persisted stability records, budgets and training jobs
//! - `http`: the external training backend and webhook notifications
//! - `ingress`: axum endpoints for drift events and operator actions
//! - `mock`: scripted collaborators for tests and dry runs

pub mod http;
pub mod ingress;
pub mod mock;
pub mod sqlite;
