//! `driftloop ingest`: validate a drift payload and POST it to the ingress.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::io::Read;
use std::time::Duration;

use crate::cli::output::{output, CommandOutput};
use crate::domain::errors::FieldViolation;
use crate::domain::models::{DriftEvent, IntakeDecision};

#[derive(Debug, Serialize)]
pub struct IngestOutput {
    pub target_id: String,
    pub severity: f64,
    /// `None` when only validated.
    pub decision: Option<IntakeDecision>,
}

impl CommandOutput for IngestOutput {
    fn to_human(&self) -> String {
        match self.decision {
            None => format!(
                "Drift event for {} (severity {:.3}) is valid.",
                self.target_id, self.severity
            ),
            Some(decision) => {
                let mut line = format!(
                    "Drift event for {} (severity {:.3}): {}",
                    self.target_id,
                    self.severity,
                    decision.as_str()
                );
                if let Some(request_id) = decision.request_id() {
                    line.push_str(&format!(" (request {request_id})"));
                }
                line
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ViolationsOutput {
    pub violations: Vec<FieldViolation>,
}

impl CommandOutput for ViolationsOutput {
    fn to_human(&self) -> String {
        let mut lines = vec!["Drift event rejected:".to_string()];
        lines.extend(
            self.violations
                .iter()
                .map(|v| format!("  {}: {}", v.field, v.message)),
        );
        lines.join("\n")
    }
}

fn read_payload(file: &str) -> Result<String> {
    if file == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read drift event from stdin")?;
        Ok(raw)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("failed to read {file}"))
    }
}

pub async fn execute(file: &str, base_url: &str, check_only: bool, json: bool) -> Result<()> {
    let raw = read_payload(file)?;
    let event = match DriftEvent::from_json(&raw) {
        Ok(event) => event,
        Err(e) => {
            output(&ViolationsOutput { violations: e.violations.clone() }, json);
            return Err(e.into());
        }
    };

    if check_only {
        output(
            &IngestOutput {
                target_id: event.target_id,
                severity: event.severity,
                decision: None,
            },
            json,
        );
        return Ok(());
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let response = client
        .post(format!("{base_url}/v1/drift-events"))
        .body(raw)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .send()
        .await
        .with_context(|| format!("failed to reach driftloop at {base_url}"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("ingress returned {status}: {body}");
    }
    let decision: IntakeDecision = response.json().await.context("unexpected ingress response")?;

    output(
        &IngestOutput {
            target_id: event.target_id,
            severity: event.severity,
            decision: Some(decision),
        },
        json,
    );
    Ok(())
}
