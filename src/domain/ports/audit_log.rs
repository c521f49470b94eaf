use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::AuditEntry;

/// Append-only record of every intake decision.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> DomainResult<()>;
}
