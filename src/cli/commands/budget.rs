//! `driftloop budget`: the current window's retrain budget for one target.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

use crate::adapters::sqlite::SqliteBudgetRepository;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, WeekendBudget};
use crate::domain::ports::BudgetRepository;

use super::open_database;

#[derive(Debug, Serialize)]
pub struct BudgetOutput {
    #[serde(flatten)]
    pub budget: WeekendBudget,
    pub remaining: u32,
}

impl From<WeekendBudget> for BudgetOutput {
    fn from(budget: WeekendBudget) -> Self {
        Self {
            remaining: budget.remaining(),
            budget,
        }
    }
}

impl CommandOutput for BudgetOutput {
    fn to_human(&self) -> String {
        let b = &self.budget;
        let mut text = format!(
            "{}: {}/{} retrains used, {} remaining\nwindow {} .. {}",
            b.target_id,
            b.retrains_used,
            b.retrains_cap,
            self.remaining,
            b.window_start.format("%a %Y-%m-%d %H:%M UTC"),
            b.window_end.format("%a %Y-%m-%d %H:%M UTC"),
        );
        if b.is_exhausted() {
            text.push_str("\nexhausted: drift events are rejected until the window resets");
        }
        text
    }
}

pub async fn execute(config: &Config, target: &str, json: bool) -> Result<()> {
    let pool = open_database(config).await?;
    let budgets = SqliteBudgetRepository::new(pool);
    let window = config.admission.window_policy().window_for(Utc::now());
    let budget = budgets
        .current(target, window, config.admission.max_weekend_retrains)
        .await?;

    output(&BudgetOutput::from(budget), json);
    Ok(())
}
