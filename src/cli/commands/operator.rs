//! `driftloop rollback` / `driftloop unfreeze`: operator actions forwarded
//! to the running server, which owns the per-target promotion locks.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::time::Duration;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::StabilityRecord;

#[derive(Debug, Clone, Copy)]
pub enum OperatorAction {
    Rollback,
    Unfreeze,
}

impl OperatorAction {
    fn path(self) -> &'static str {
        match self {
            Self::Rollback => "rollback",
            Self::Unfreeze => "unfreeze",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OperatorOutput {
    pub action: &'static str,
    pub record: StabilityRecord,
}

impl CommandOutput for OperatorOutput {
    fn to_human(&self) -> String {
        let r = &self.record;
        let mut lines = vec![
            format!("{} {}: ok", self.action, r.target_id),
            format!("  production: {}", r.current_production_ref),
            format!(
                "  previous:   {}",
                r.previous_stable_ref.as_deref().unwrap_or("-")
            ),
        ];
        if r.frozen {
            lines.push(format!(
                "  FROZEN: {}",
                r.frozen_reason.as_deref().unwrap_or("no reason recorded")
            ));
        }
        lines.join("\n")
    }
}

pub async fn execute(action: OperatorAction, target: &str, base_url: &str, json: bool) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?;

    let mut url = reqwest::Url::parse(base_url).with_context(|| format!("invalid URL {base_url}"))?;
    url.path_segments_mut()
        .map_err(|()| anyhow::anyhow!("invalid URL {base_url}"))?
        .pop_if_empty()
        .extend(["v1", "targets", target, action.path()]);

    let response = client
        .post(url)
        .send()
        .await
        .with_context(|| format!("failed to reach driftloop at {base_url}"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("{} {target} failed ({status}): {body}", action.path());
    }

    let record: StabilityRecord = response.json().await.context("unexpected server response")?;
    output(
        &OperatorOutput {
            action: action.path(),
            record,
        },
        json,
    );
    Ok(())
}
