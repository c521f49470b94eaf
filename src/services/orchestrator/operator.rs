//! Restart recovery, baseline bootstrap and operator actions.

use tracing::{info, warn};

use super::{Orchestrator, OrchestratorError, OrchestratorHealth, OrchestratorResult, TargetStatus};
use crate::domain::models::{
    JobStatus, Notification, NotificationKind, RejectReason, StabilityRecord, TargetCycle,
};
use crate::services::promotion::PromotionError;

/// Jobs listed per target in a status snapshot.
const RECENT_JOBS: u32 = 5;

impl Orchestrator {
    /// Resolve jobs orphaned by a previous process.
    ///
    /// `Running` jobs have no live supervisor any more and become `TimedOut`.
    /// Admitted jobs that were never submitted become `Failed` and their
    /// budget is refunded if their window is still current.
    ///
    /// Returns the number of jobs recovered.
    pub async fn recover(&self) -> OrchestratorResult<usize> {
        let now = self.now();
        let mut recovered = 0;

        for mut job in self.ports.jobs.list_by_status(JobStatus::Running).await? {
            job.fail(JobStatus::TimedOut, "orchestrator restarted while job was running", now)?;
            self.ports.jobs.update(&job).await?;
            self.ports.jobs.complete_cycle(job.id, now).await?;
            warn!(target_id = %job.target_id, job_id = %job.id, "running job from previous process marked timed out");

            self.bus
                .publish(
                    Notification::new(
                        NotificationKind::JobRecovered,
                        &job.target_id,
                        "job was running when the orchestrator stopped; marked timed out",
                        now,
                    )
                    .with_reason(RejectReason::TimedOut)
                    .with_request(job.request_id)
                    .with_job(job.id),
                )
                .await;
            recovered += 1;
        }

        for mut job in self.ports.jobs.list_by_status(JobStatus::Queued).await? {
            job.fail(JobStatus::Failed, "orchestrator restarted before job was submitted", now)?;
            self.ports.jobs.update(&job).await?;
            self.ports.jobs.complete_cycle(job.id, now).await?;

            let window_start = self.admission.window_policy().window_for(job.created_at).0;
            self.admission.refund(&job.target_id, window_start).await?;
            warn!(target_id = %job.target_id, job_id = %job.id, "unsubmitted job from previous process marked failed");

            self.bus
                .publish(
                    Notification::new(
                        NotificationKind::JobRecovered,
                        &job.target_id,
                        "job was admitted but never submitted; marked failed and budget refunded",
                        now,
                    )
                    .with_request(job.request_id)
                    .with_job(job.id),
                )
                .await;
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "recovered orphaned training jobs");
        }
        Ok(recovered)
    }

    /// Record the registry's current production model as the baseline of
    /// `target_id` when no stability record exists yet.
    pub async fn bootstrap_target(&self, target_id: &str) -> OrchestratorResult<Option<StabilityRecord>> {
        Ok(self.promotion.bootstrap(target_id).await?)
    }

    /// Operator-initiated rollback to the previous stable model.
    ///
    /// Allowed while promotions are frozen. Any failure other than there
    /// being nothing to restore leaves the target frozen and raises a
    /// rollback-failure notification.
    pub async fn rollback_target(&self, target_id: &str) -> OrchestratorResult<StabilityRecord> {
        match self.ports.stability.get(target_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(OrchestratorError::UnknownTarget(target_id.to_string())),
            Err(e) => {
                let e = PromotionError::Store(e);
                self.promotion.freeze(target_id, &format!("rollback failed: {e}")).await;
                self.bus.publish(self.rollback_failure(target_id, &e)).await;
                return Err(e.into());
            }
        }
        match self.promotion.rollback(target_id).await {
            Ok(record) => {
                self.bus
                    .publish(
                        Notification::new(
                            NotificationKind::RolledBack,
                            target_id,
                            format!("manual rollback restored {}", record.current_production_ref),
                            self.now(),
                        )
                        .with_details(serde_json::json!({
                            "restored_ref": record.current_production_ref,
                            "manual": true,
                        })),
                    )
                    .await;
                Ok(record)
            }
            Err(e @ PromotionError::NothingToRollBack(_)) => Err(e.into()),
            Err(e) => {
                let notification = self.rollback_failure(target_id, &e);
                self.bus.publish(notification).await;
                Err(e.into())
            }
        }
    }

    /// Clear a rollback-failure freeze.
    pub async fn unfreeze_target(&self, target_id: &str) -> OrchestratorResult<StabilityRecord> {
        if self.ports.stability.get(target_id).await?.is_none() {
            return Err(OrchestratorError::UnknownTarget(target_id.to_string()));
        }
        let record = self.promotion.unfreeze(target_id).await?;
        self.bus
            .publish(Notification::new(
                NotificationKind::Unfrozen,
                target_id,
                "promotions unfrozen by operator",
                self.now(),
            ))
            .await;
        Ok(record)
    }

    pub async fn target_status(&self, target_id: &str) -> OrchestratorResult<TargetStatus> {
        let now = self.now();
        let (cycle, pending_request) = {
            let board = self.board.lock().await;
            (
                board
                    .cycles
                    .get(target_id)
                    .cloned()
                    .unwrap_or_else(|| TargetCycle::idle(target_id, now)),
                board.queue.get(target_id).cloned(),
            )
        };

        Ok(TargetStatus {
            target_id: target_id.to_string(),
            cycle,
            pending_request,
            stability: self
                .ports
                .stability
                .get(target_id)
                .await?
                .map(|record| self.promotion.with_held_freeze(record)),
            budget: self.admission.budget(target_id, now).await?,
            recent_jobs: self.ports.jobs.list_for_target(target_id, RECENT_JOBS).await?,
        })
    }

    pub async fn health(&self) -> OrchestratorHealth {
        let board = self.board.lock().await;
        OrchestratorHealth {
            queued_requests: board.queue.len(),
            in_flight_cycles: board.cycles.values().filter(|c| c.state.is_in_flight()).count(),
            available_slots: self.admission.available_slots(),
            concurrency_ceiling: self.admission.ceiling(),
        }
    }
}
