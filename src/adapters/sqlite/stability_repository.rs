//! SQLite implementation of the StabilityRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::adapters::sqlite::{format_datetime, format_optional_datetime, parse_optional_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::StabilityRecord;
use crate::domain::ports::StabilityRepository;

#[derive(Clone)]
pub struct SqliteStabilityRepository {
    pool: SqlitePool,
}

impl SqliteStabilityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StabilityRow {
    target_id: String,
    current_production_ref: String,
    previous_stable_ref: Option<String>,
    promoted_at: Option<String>,
    frozen: i32,
    frozen_reason: Option<String>,
}

fn row_to_record(row: StabilityRow) -> DomainResult<StabilityRecord> {
    Ok(StabilityRecord {
        target_id: row.target_id,
        current_production_ref: row.current_production_ref,
        previous_stable_ref: row.previous_stable_ref,
        promoted_at: parse_optional_datetime(row.promoted_at)?,
        frozen: row.frozen != 0,
        frozen_reason: row.frozen_reason,
    })
}

const SELECT_COLUMNS: &str = "SELECT target_id, current_production_ref, previous_stable_ref, \
     promoted_at, frozen, frozen_reason FROM stability_records";

#[async_trait]
impl StabilityRepository for SqliteStabilityRepository {
    async fn get(&self, target_id: &str) -> DomainResult<Option<StabilityRecord>> {
        let row: Option<StabilityRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE target_id = ?"))
            .bind(target_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_record).transpose()
    }

    async fn create_if_absent(&self, record: &StabilityRecord) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"INSERT INTO stability_records
               (target_id, current_production_ref, previous_stable_ref, promoted_at,
                frozen, frozen_reason, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(target_id) DO NOTHING"#,
        )
        .bind(&record.target_id)
        .bind(&record.current_production_ref)
        .bind(&record.previous_stable_ref)
        .bind(format_optional_datetime(record.promoted_at))
        .bind(i32::from(record.frozen))
        .bind(&record.frozen_reason)
        .bind(format_datetime(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_swap(
        &self,
        expected_current: &str,
        record: &StabilityRecord,
    ) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE stability_records SET
               current_production_ref = ?, previous_stable_ref = ?, promoted_at = ?,
               updated_at = ?
               WHERE target_id = ? AND current_production_ref = ?"#,
        )
        .bind(&record.current_production_ref)
        .bind(&record.previous_stable_ref)
        .bind(format_optional_datetime(record.promoted_at))
        .bind(format_datetime(Utc::now()))
        .bind(&record.target_id)
        .bind(expected_current)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ConcurrencyConflict {
                entity: "stability_record".to_string(),
                id: record.target_id.clone(),
            });
        }
        Ok(())
    }

    async fn set_frozen(&self, target_id: &str, reason: Option<&str>) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE stability_records SET frozen = ?, frozen_reason = ?, updated_at = ? WHERE target_id = ?",
        )
        .bind(i32::from(reason.is_some()))
        .bind(reason)
        .bind(format_datetime(Utc::now()))
        .bind(target_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::StabilityRecordNotFound(target_id.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> DomainResult<Vec<StabilityRecord>> {
        let rows: Vec<StabilityRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY target_id"))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    async fn setup() -> SqliteStabilityRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteStabilityRepository::new(pool)
    }

    #[tokio::test]
    async fn test_create_if_absent_keeps_first_baseline() {
        let repo = setup().await;
        assert!(repo.create_if_absent(&StabilityRecord::baseline("lap_time", "v1")).await.unwrap());
        assert!(!repo.create_if_absent(&StabilityRecord::baseline("lap_time", "v9")).await.unwrap());

        let record = repo.get("lap_time").await.unwrap().unwrap();
        assert_eq!(record.current_production_ref, "v1");
        assert!(record.previous_stable_ref.is_none());
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let repo = setup().await;
        let base = StabilityRecord::baseline("lap_time", "v1");
        repo.create_if_absent(&base).await.unwrap();

        let promoted = base.promoted("v2", Utc::now());
        repo.compare_and_swap("v1", &promoted).await.unwrap();

        let stored = repo.get("lap_time").await.unwrap().unwrap();
        assert_eq!(stored.current_production_ref, "v2");
        assert_eq!(stored.previous_stable_ref.as_deref(), Some("v1"));
        assert!(stored.promoted_at.is_some());

        // Stale expectation is rejected and nothing changes.
        let err = repo.compare_and_swap("v1", &base.promoted("v3", Utc::now())).await.unwrap_err();
        assert!(matches!(err, DomainError::ConcurrencyConflict { .. }));
        assert_eq!(repo.get("lap_time").await.unwrap().unwrap().current_production_ref, "v2");
    }

    #[tokio::test]
    async fn test_freeze_and_unfreeze() {
        let repo = setup().await;
        repo.create_if_absent(&StabilityRecord::baseline("lap_time", "v1")).await.unwrap();

        repo.set_frozen("lap_time", Some("registry unreachable")).await.unwrap();
        let frozen = repo.get("lap_time").await.unwrap().unwrap();
        assert!(frozen.frozen);
        assert_eq!(frozen.frozen_reason.as_deref(), Some("registry unreachable"));

        repo.set_frozen("lap_time", None).await.unwrap();
        assert!(!repo.get("lap_time").await.unwrap().unwrap().frozen);

        let err = repo.set_frozen("unknown", None).await.unwrap_err();
        assert!(matches!(err, DomainError::StabilityRecordNotFound(_)));
    }
}
