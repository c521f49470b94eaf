//! Drift signal intake.
//!
//! Turns drift events into at most one pending retrain request per target.
//! The caller holds the exclusion that guards the request queue; intake only
//! decides and records.
//!
//! [`DriftIntake::submit`] runs all three steps. The orchestrator runs them
//! separately so the store lookup and the audit write happen outside the
//! queue lock and only [`DriftIntake::decide`] runs under it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AuditEntry, BudgetWindowPolicy, DriftEvent, IntakeConfig, IntakeDecision, RequestQueue,
    RetrainRequest,
};
use crate::domain::ports::{AuditLog, JobRepository};

/// What intake did with one event, plus the requests it touched.
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeOutcome {
    pub decision: IntakeDecision,
    /// The pending request after the decision, for accepted/coalesced/superseded events.
    pub request: Option<RetrainRequest>,
    /// The stale request canceled by a supersede.
    pub replaced: Option<RetrainRequest>,
}

impl IntakeOutcome {
    fn without_request(decision: IntakeDecision) -> Self {
        Self {
            decision,
            request: None,
            replaced: None,
        }
    }
}

pub struct DriftIntake {
    config: IntakeConfig,
    window_policy: BudgetWindowPolicy,
    jobs: Arc<dyn JobRepository>,
    audit: Arc<dyn AuditLog>,
}

impl DriftIntake {
    pub fn new(
        config: IntakeConfig,
        window_policy: BudgetWindowPolicy,
        jobs: Arc<dyn JobRepository>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            config,
            window_policy,
            jobs,
            audit,
        }
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    /// Apply one drift event to `queue`.
    ///
    /// `in_flight` is whether the target currently has an admitted cycle.
    pub async fn submit(
        &self,
        event: &DriftEvent,
        queue: &mut RequestQueue,
        in_flight: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<IntakeOutcome> {
        let last_completion = self.last_completion(event).await?;
        let outcome = self.decide(event, queue, in_flight, last_completion, now);
        self.record(event, &outcome, now).await;
        Ok(outcome)
    }

    /// Latest recorded cycle completion of the event's target, looked up only
    /// for events that clear the severity threshold.
    pub async fn last_completion(&self, event: &DriftEvent) -> DomainResult<Option<DateTime<Utc>>> {
        if !self.qualifies(event) {
            return Ok(None);
        }
        self.jobs.last_cycle_completion(&event.target_id).await
    }

    fn qualifies(&self, event: &DriftEvent) -> bool {
        event.severity >= self.config.severity_threshold
    }

    /// Apply one event to `queue` given the target's latest cycle completion.
    pub fn decide(
        &self,
        event: &DriftEvent,
        queue: &mut RequestQueue,
        in_flight: bool,
        last_completion: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> IntakeOutcome {
        let target_id = event.target_id.as_str();

        if !self.qualifies(event) {
            debug!(target_id, severity = event.severity, "drift event below threshold, ignored");
            return IntakeOutcome::without_request(IntakeDecision::Ignored);
        }

        if in_flight {
            debug!(target_id, severity = event.severity, "target mid-cycle, event dropped");
            return IntakeOutcome::without_request(IntakeDecision::InCooldown);
        }

        let window_start = self.window_policy.window_for(now).0;

        if let Some(pending) = queue.get(target_id).cloned() {
            if pending.within_debounce(now, self.config.debounce_seconds) {
                let updated = queue
                    .update(target_id, |r| r.coalesce(event.severity, now))
                    .unwrap_or(pending);
                debug!(
                    target_id,
                    request_id = %updated.id,
                    severity = updated.trigger_severity,
                    coalesced_count = updated.coalesced_count,
                    "drift event coalesced"
                );
                return IntakeOutcome {
                    decision: IntakeDecision::Coalesced {
                        request_id: updated.id,
                    },
                    request: Some(updated),
                    replaced: None,
                };
            }

            let next = pending.supersede(event.severity, now, window_start);
            queue.upsert(next.clone());
            info!(
                target_id,
                request_id = %next.id,
                replaced = %pending.id,
                severity = next.trigger_severity,
                "stale pending request superseded"
            );
            return IntakeOutcome {
                decision: IntakeDecision::Superseded {
                    request_id: next.id,
                    replaced: pending.id,
                },
                request: Some(next),
                replaced: Some(pending),
            };
        }

        if let Some(completed_at) = last_completion {
            let cooldown = Duration::seconds(i64::try_from(self.config.cooldown_seconds).unwrap_or(i64::MAX));
            if now.signed_duration_since(completed_at) < cooldown {
                debug!(target_id, %completed_at, "drift event within cooldown, dropped");
                return IntakeOutcome::without_request(IntakeDecision::InCooldown);
            }
        }

        let request = RetrainRequest::new(target_id, event.severity, now, window_start);
        queue.upsert(request.clone());
        info!(
            target_id,
            request_id = %request.id,
            severity = request.trigger_severity,
            priority = request.priority,
            "retrain request accepted"
        );
        IntakeOutcome {
            decision: IntakeDecision::Accepted {
                request_id: request.id,
            },
            request: Some(request),
            replaced: None,
        }
    }

    pub async fn record(&self, event: &DriftEvent, outcome: &IntakeOutcome, now: DateTime<Utc>) {
        let entry = AuditEntry {
            timestamp: now,
            target_id: event.target_id.clone(),
            severity: event.severity,
            detected_at: event.detected_at,
            decision: outcome.decision,
            coalesced_count: outcome.request.as_ref().map(|r| r.coalesced_count),
        };
        if let Err(e) = self.audit.record(&entry).await {
            warn!(target_id = %event.target_id, error = %e, "failed to write audit entry");
        }
    }
}
