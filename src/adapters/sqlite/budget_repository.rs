//! SQLite implementation of the BudgetRepository.
//!
//! Budget consumption and job creation share one transaction, and the
//! increment itself is guarded by `retrains_used < retrains_cap`, so the cap
//! holds even when several admissions race for the last retrain.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool};

use crate::adapters::sqlite::job_repository::insert_job;
use crate::adapters::sqlite::{format_datetime, parse_datetime};
use crate::domain::errors::DomainResult;
use crate::domain::models::{TrainingJob, WeekendBudget};
use crate::domain::ports::BudgetRepository;

#[derive(Clone)]
pub struct SqliteBudgetRepository {
    pool: SqlitePool,
}

impl SqliteBudgetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BudgetRow {
    target_id: String,
    window_start: String,
    window_end: String,
    retrains_used: i64,
    retrains_cap: i64,
}

fn row_to_budget(row: BudgetRow) -> DomainResult<WeekendBudget> {
    Ok(WeekendBudget {
        target_id: row.target_id,
        window_start: parse_datetime(&row.window_start)?,
        window_end: parse_datetime(&row.window_end)?,
        retrains_used: u32::try_from(row.retrains_used).unwrap_or(0),
        retrains_cap: u32::try_from(row.retrains_cap).unwrap_or(0),
    })
}

/// Create the row for `window`, or reset it when a newer window has begun.
async fn roll_window<'e, E>(
    executor: E,
    target_id: &str,
    window: (DateTime<Utc>, DateTime<Utc>),
    cap: u32,
) -> DomainResult<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"INSERT INTO budgets (target_id, window_start, window_end, retrains_used, retrains_cap)
           VALUES (?, ?, ?, 0, ?)
           ON CONFLICT(target_id) DO UPDATE SET
               window_start = excluded.window_start,
               window_end = excluded.window_end,
               retrains_used = 0,
               retrains_cap = excluded.retrains_cap
           WHERE budgets.window_start < excluded.window_start"#,
    )
    .bind(target_id)
    .bind(format_datetime(window.0))
    .bind(format_datetime(window.1))
    .bind(i64::from(cap))
    .execute(executor)
    .await?;

    Ok(())
}

async fn fetch_budget<'e, E>(executor: E, target_id: &str) -> DomainResult<Option<WeekendBudget>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<BudgetRow> = sqlx::query_as("SELECT * FROM budgets WHERE target_id = ?")
        .bind(target_id)
        .fetch_optional(executor)
        .await?;

    row.map(row_to_budget).transpose()
}

#[async_trait]
impl BudgetRepository for SqliteBudgetRepository {
    async fn current(
        &self,
        target_id: &str,
        window: (DateTime<Utc>, DateTime<Utc>),
        cap: u32,
    ) -> DomainResult<WeekendBudget> {
        roll_window(&self.pool, target_id, window, cap).await?;
        let budget = fetch_budget(&self.pool, target_id).await?;
        Ok(budget.unwrap_or_else(|| WeekendBudget::fresh(target_id, window, cap)))
    }

    async fn admit(
        &self,
        window: (DateTime<Utc>, DateTime<Utc>),
        cap: u32,
        job: &TrainingJob,
    ) -> DomainResult<Option<WeekendBudget>> {
        let mut tx = self.pool.begin().await?;

        roll_window(&mut *tx, &job.target_id, window, cap).await?;

        let consumed = sqlx::query(
            r#"UPDATE budgets SET retrains_used = retrains_used + 1
               WHERE target_id = ? AND window_start = ? AND retrains_used < retrains_cap"#,
        )
        .bind(&job.target_id)
        .bind(format_datetime(window.0))
        .execute(&mut *tx)
        .await?;

        if consumed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        insert_job(&mut *tx, job).await?;
        let budget = fetch_budget(&mut *tx, &job.target_id).await?;
        tx.commit().await?;

        Ok(budget)
    }

    async fn refund(&self, target_id: &str, window_start: DateTime<Utc>) -> DomainResult<()> {
        sqlx::query(
            r#"UPDATE budgets SET retrains_used = retrains_used - 1
               WHERE target_id = ? AND window_start = ? AND retrains_used > 0"#,
        )
        .bind(target_id)
        .bind(format_datetime(window_start))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, target_id: &str) -> DomainResult<Option<WeekendBudget>> {
        fetch_budget(&self.pool, target_id).await
    }

    async fn list(&self) -> DomainResult<Vec<WeekendBudget>> {
        let rows: Vec<BudgetRow> = sqlx::query_as("SELECT * FROM budgets ORDER BY target_id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_budget).collect()
    }
}
