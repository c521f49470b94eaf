//! Repository port for per-target retrain budgets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{TrainingJob, WeekendBudget};

/// Persisted budgets. One row per target, reset when its window rolls over.
#[async_trait]
pub trait BudgetRepository: Send + Sync {
    /// The budget for the window starting at `window.0`, resetting a stale row.
    async fn current(
        &self,
        target_id: &str,
        window: (DateTime<Utc>, DateTime<Utc>),
        cap: u32,
    ) -> DomainResult<WeekendBudget>;

    /// Consume one retrain and create `job` in a single transaction.
    ///
    /// Returns `None` without creating the job when the cap is already reached.
    async fn admit(
        &self,
        window: (DateTime<Utc>, DateTime<Utc>),
        cap: u32,
        job: &TrainingJob,
    ) -> DomainResult<Option<WeekendBudget>>;

    /// Return one retrain to the window starting at `window_start`, if it is still current.
    async fn refund(&self, target_id: &str, window_start: DateTime<Utc>) -> DomainResult<()>;

    async fn get(&self, target_id: &str) -> DomainResult<Option<WeekendBudget>>;

    async fn list(&self) -> DomainResult<Vec<WeekendBudget>>;
}
