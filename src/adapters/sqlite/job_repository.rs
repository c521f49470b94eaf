//! SQLite implementation of the JobRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool};
use uuid::Uuid;

use crate::adapters::sqlite::{
    format_datetime, format_optional_datetime, parse_datetime, parse_optional_datetime, parse_uuid,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{JobStatus, TrainingJob};
use crate::domain::ports::JobRepository;

#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    target_id: String,
    request_id: String,
    external_id: Option<String>,
    status: String,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    failure_reason: Option<String>,
    cycle_completed_at: Option<String>,
}

fn row_to_job(row: JobRow) -> DomainResult<TrainingJob> {
    let status = JobStatus::from_str(&row.status).ok_or_else(|| {
        DomainError::SerializationError(format!("Unknown job status: {}", row.status))
    })?;

    Ok(TrainingJob {
        id: parse_uuid(&row.id)?,
        target_id: row.target_id,
        request_id: parse_uuid(&row.request_id)?,
        external_id: row.external_id,
        status,
        created_at: parse_datetime(&row.created_at)?,
        started_at: parse_optional_datetime(row.started_at)?,
        finished_at: parse_optional_datetime(row.finished_at)?,
        failure_reason: row.failure_reason,
        cycle_completed_at: parse_optional_datetime(row.cycle_completed_at)?,
    })
}

/// Insert a freshly admitted job. Runs inside the admission transaction.
pub(crate) async fn insert_job<'e, E>(executor: E, job: &TrainingJob) -> DomainResult<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"INSERT INTO training_jobs
           (id, target_id, request_id, external_id, status, created_at,
            started_at, finished_at, failure_reason, cycle_completed_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(job.id.to_string())
    .bind(&job.target_id)
    .bind(job.request_id.to_string())
    .bind(&job.external_id)
    .bind(job.status.as_str())
    .bind(format_datetime(job.created_at))
    .bind(format_optional_datetime(job.started_at))
    .bind(format_optional_datetime(job.finished_at))
    .bind(&job.failure_reason)
    .bind(format_optional_datetime(job.cycle_completed_at))
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn get(&self, id: Uuid) -> DomainResult<Option<TrainingJob>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM training_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_job).transpose()
    }

    async fn update(&self, job: &TrainingJob) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE training_jobs SET
               external_id = ?, status = ?, started_at = ?, finished_at = ?,
               failure_reason = ?, cycle_completed_at = ?
               WHERE id = ?"#,
        )
        .bind(&job.external_id)
        .bind(job.status.as_str())
        .bind(format_optional_datetime(job.started_at))
        .bind(format_optional_datetime(job.finished_at))
        .bind(&job.failure_reason)
        .bind(format_optional_datetime(job.cycle_completed_at))
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::JobNotFound(job.id));
        }
        Ok(())
    }

    async fn list_by_status(&self, status: JobStatus) -> DomainResult<Vec<TrainingJob>> {
        let rows: Vec<JobRow> =
            sqlx::query_as("SELECT * FROM training_jobs WHERE status = ? ORDER BY created_at")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(row_to_job).collect()
    }

    async fn list_for_target(&self, target_id: &str, limit: u32) -> DomainResult<Vec<TrainingJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM training_jobs WHERE target_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(target_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_job).collect()
    }

    async fn complete_cycle(&self, id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        let result = sqlx::query("UPDATE training_jobs SET cycle_completed_at = ? WHERE id = ?")
            .bind(format_datetime(at))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::JobNotFound(id));
        }
        Ok(())
    }

    async fn last_cycle_completion(&self, target_id: &str) -> DomainResult<Option<DateTime<Utc>>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            r#"SELECT MAX(cycle_completed_at) FROM training_jobs
               WHERE target_id = ? AND started_at IS NOT NULL"#,
        )
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;

        parse_optional_datetime(row.and_then(|(at,)| at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use chrono::Duration;

    async fn setup() -> SqliteJobRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteJobRepository::new(pool)
    }

    async fn insert(repo: &SqliteJobRepository, target: &str) -> TrainingJob {
        let job = TrainingJob::new(target, Uuid::new_v4(), Utc::now());
        insert_job(&repo.pool, &job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_insert_and_update() {
        let repo = setup().await;
        let mut job = insert(&repo, "lap_time").await;

        job.start("ext-42", Utc::now()).unwrap();
        repo.update(&job).await.unwrap();

        let stored = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.external_id.as_deref(), Some("ext-42"));
        assert_eq!(repo.list_by_status(JobStatus::Running).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_running_job_for_target_is_rejected() {
        let repo = setup().await;
        let now = Utc::now();
        let mut first = insert(&repo, "lap_time").await;
        let mut second = insert(&repo, "lap_time").await;

        first.start("ext-1", now).unwrap();
        repo.update(&first).await.unwrap();

        second.start("ext-2", now).unwrap();
        assert!(repo.update(&second).await.is_err());
    }

    #[tokio::test]
    async fn test_last_cycle_completion_ignores_unstarted_jobs() {
        let repo = setup().await;
        let now = Utc::now();

        let mut trained = insert(&repo, "lap_time").await;
        trained.start("ext-1", now).unwrap();
        trained.transition_to(JobStatus::Succeeded, now).unwrap();
        repo.update(&trained).await.unwrap();
        repo.complete_cycle(trained.id, now).await.unwrap();

        // Rejected before training (data not ready): no cooldown contribution.
        let mut unstarted = insert(&repo, "lap_time").await;
        unstarted.fail(JobStatus::Failed, "data not ready", now).unwrap();
        repo.update(&unstarted).await.unwrap();
        repo.complete_cycle(unstarted.id, now + Duration::seconds(90)).await.unwrap();

        let last = repo.last_cycle_completion("lap_time").await.unwrap().unwrap();
        assert_eq!(format_datetime(last), format_datetime(now));
        assert!(repo.last_cycle_completion("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        let repo = setup().await;
        let job = TrainingJob::new("lap_time", Uuid::new_v4(), Utc::now());
        assert!(matches!(repo.update(&job).await, Err(DomainError::JobNotFound(_))));
    }
}
