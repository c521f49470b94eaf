//! `driftloop status`: stability records, budgets and recent jobs.

use anyhow::Result;
use chrono::Utc;
use comfy_table::Cell;
use serde::Serialize;

use crate::adapters::sqlite::{SqliteBudgetRepository, SqliteJobRepository, SqliteStabilityRepository};
use crate::cli::output::{job_status_cell, output, table, truncate, CommandOutput};
use crate::domain::models::{Config, StabilityRecord, TrainingJob, WeekendBudget};
use crate::domain::ports::{BudgetRepository, JobRepository, StabilityRepository};

use super::open_database;

const RECENT_JOBS: u32 = 10;

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub records: Vec<StabilityRecord>,
    pub budgets: Vec<WeekendBudget>,
    pub jobs: Vec<TrainingJob>,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        if self.records.is_empty() && self.budgets.is_empty() && self.jobs.is_empty() {
            return "No targets tracked yet.".to_string();
        }

        let mut sections = Vec::new();

        if !self.records.is_empty() {
            let mut t = table(&["TARGET", "PRODUCTION", "PREVIOUS", "PROMOTED", "FROZEN"]);
            for r in &self.records {
                t.add_row(vec![
                    Cell::new(&r.target_id),
                    Cell::new(truncate(&r.current_production_ref, 40)),
                    Cell::new(truncate(r.previous_stable_ref.as_deref().unwrap_or("-"), 40)),
                    Cell::new(
                        r.promoted_at
                            .map_or_else(|| "baseline".to_string(), |at| at.format("%Y-%m-%d %H:%M").to_string()),
                    ),
                    Cell::new(if r.frozen {
                        r.frozen_reason.as_deref().unwrap_or("yes")
                    } else {
                        "no"
                    }),
                ]);
            }
            sections.push(format!("Stability records\n{t}"));
        }

        if !self.budgets.is_empty() {
            let mut t = table(&["TARGET", "USED", "CAP", "WINDOW"]);
            for b in &self.budgets {
                t.add_row(vec![
                    Cell::new(&b.target_id),
                    Cell::new(b.retrains_used),
                    Cell::new(b.retrains_cap),
                    Cell::new(format!(
                        "{} .. {}",
                        b.window_start.format("%a %Y-%m-%d"),
                        b.window_end.format("%a %Y-%m-%d")
                    )),
                ]);
            }
            sections.push(format!("Budgets\n{t}"));
        }

        if !self.jobs.is_empty() {
            let mut t = table(&["JOB", "TARGET", "STATUS", "CREATED", "REASON"]);
            for j in &self.jobs {
                t.add_row(vec![
                    Cell::new(&j.id.to_string()[..8]),
                    Cell::new(&j.target_id),
                    job_status_cell(j.status),
                    Cell::new(j.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
                    Cell::new(truncate(j.failure_reason.as_deref().unwrap_or("-"), 48)),
                ]);
            }
            sections.push(format!("Recent jobs\n{t}"));
        }

        sections.join("\n\n")
    }
}

pub async fn execute(config: &Config, target: Option<&str>, json: bool) -> Result<()> {
    let pool = open_database(config).await?;
    let stability = SqliteStabilityRepository::new(pool.clone());
    let budgets = SqliteBudgetRepository::new(pool.clone());
    let jobs = SqliteJobRepository::new(pool);

    let result = match target {
        Some(target) => {
            let window = config.admission.window_policy().window_for(Utc::now());
            StatusOutput {
                records: stability.get(target).await?.into_iter().collect(),
                budgets: vec![
                    budgets
                        .current(target, window, config.admission.max_weekend_retrains)
                        .await?,
                ],
                jobs: jobs.list_for_target(target, RECENT_JOBS).await?,
            }
        }
        None => StatusOutput {
            records: stability.list().await?,
            budgets: budgets.list().await?,
            jobs: Vec::new(),
        },
    };

    output(&result, json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_empty_status() {
        let out = StatusOutput {
            records: vec![],
            budgets: vec![],
            jobs: vec![],
        };
        assert_eq!(out.to_human(), "No targets tracked yet.");
    }

    #[test]
    fn test_human_output_marks_frozen_targets() {
        let mut record = StabilityRecord::baseline("lap_time", "models/lap_time/v1");
        record.frozen = true;
        record.frozen_reason = Some("rollback failed in registry".to_string());
        let window = (
            Utc.with_ymd_and_hms(2026, 3, 6, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 13, 0, 0, 0).unwrap(),
        );

        let out = StatusOutput {
            records: vec![record],
            budgets: vec![WeekendBudget::fresh("lap_time", window, 3)],
            jobs: vec![],
        };
        let text = out.to_human();
        assert!(text.contains("rollback failed in registry"));
        assert!(text.contains("Fri 2026-03-06"));
    }
}
