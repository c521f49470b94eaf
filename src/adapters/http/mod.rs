//! Outbound HTTP adapters.

pub mod backend;
pub mod webhook;

pub use backend::{BackendError, HttpBackend};
pub use webhook::WebhookNotifier;
