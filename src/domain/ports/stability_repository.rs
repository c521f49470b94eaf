//! Repository port for stability records.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::StabilityRecord;

#[async_trait]
pub trait StabilityRepository: Send + Sync {
    async fn get(&self, target_id: &str) -> DomainResult<Option<StabilityRecord>>;

    /// Insert the record unless one already exists. Returns whether it was inserted.
    async fn create_if_absent(&self, record: &StabilityRecord) -> DomainResult<bool>;

    /// Replace the record only if production still points at `expected_current`.
    ///
    /// Fails with `ConcurrencyConflict` when the stored record moved underneath.
    async fn compare_and_swap(
        &self,
        expected_current: &str,
        record: &StabilityRecord,
    ) -> DomainResult<()>;

    async fn set_frozen(&self, target_id: &str, reason: Option<&str>) -> DomainResult<()>;

    async fn list(&self) -> DomainResult<Vec<StabilityRecord>>;
}
