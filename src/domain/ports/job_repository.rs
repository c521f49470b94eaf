//! Repository port for training jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{JobStatus, TrainingJob};

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> DomainResult<Option<TrainingJob>>;

    async fn update(&self, job: &TrainingJob) -> DomainResult<()>;

    async fn list_by_status(&self, status: JobStatus) -> DomainResult<Vec<TrainingJob>>;

    async fn list_for_target(&self, target_id: &str, limit: u32) -> DomainResult<Vec<TrainingJob>>;

    /// Stamp the end of the retrain cycle the job belongs to.
    async fn complete_cycle(&self, id: Uuid, at: DateTime<Utc>) -> DomainResult<()>;

    /// Latest cycle completion for a target whose job actually started training.
    async fn last_cycle_completion(&self, target_id: &str) -> DomainResult<Option<DateTime<Utc>>>;
}
