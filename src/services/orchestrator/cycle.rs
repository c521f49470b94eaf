//! One admitted retrain cycle: data readiness, training, validation,
//! promotion and the post-promotion health watch.

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::Orchestrator;
use crate::domain::models::{
    CandidateModel, CycleState, EvaluationReport, JobStatus, ModelMetrics, ModelVersion, Notification,
    NotificationKind, RejectReason, RetrainRequest, StabilityRecord, TrainingJob, TriggerKind,
    ValidationResult,
};
use crate::domain::ports::{DataSnapshot, JobReport, JobSpec};
use crate::services::admission::Admission;
use crate::services::promotion::PromotionError;

/// Why a cycle stopped before promotion.
struct Stop {
    reason: RejectReason,
    message: String,
    details: serde_json::Value,
}

impl Stop {
    fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

impl Orchestrator {
    pub(super) async fn run_cycle(self, request: RetrainRequest, admission: Admission) {
        let target_id = request.target_id.clone();
        let Admission { mut job, budget, permit } = admission;

        let snapshot = match self.ports.data.is_ready(&target_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(%target_id, error = %e, "data readiness check failed, treating as not ready");
                DataSnapshot::not_ready()
            }
        };
        let Some(dataset_ref) = snapshot.usable_ref().map(str::to_string) else {
            drop(permit);
            self.defer_for_data(request, job, budget.window_start).await;
            return;
        };

        let trained = self.train(&request, &mut job, dataset_ref.clone()).await;
        // The slot covers training only.
        drop(permit);
        self.wake();

        let (artifact_ref, metrics) = match trained {
            Ok(trained) => trained,
            Err(stop) => return self.stop(&target_id, &job, stop).await,
        };

        if self.transition(&target_id, CycleState::Validating).await.is_none() {
            return;
        }

        let (result, version, candidate) =
            match self.validate(&request, &job, artifact_ref, metrics, &dataset_ref).await {
                Ok(validated) => validated,
                Err(stop) => return self.stop(&target_id, &job, stop).await,
            };

        let details = validation_details(&result, &version, &candidate);
        if !result.is_promote() {
            let reason = result.reject_reason.unwrap_or(RejectReason::ValidationRegression);
            let stop = Stop::new(reason, format!("candidate {} rejected: {reason}", candidate.candidate_id))
                .with_details(details);
            return self.stop(&target_id, &job, stop).await;
        }

        let record = match self.promotion.promote(&target_id, &candidate.artifact_ref).await {
            Ok(record) => record,
            Err(PromotionError::Frozen { reason, .. }) => {
                let stop = Stop::new(RejectReason::PromotionFrozen, format!("promotions frozen: {reason}"))
                    .with_details(details);
                return self.stop(&target_id, &job, stop).await;
            }
            Err(e) => {
                let stop = Stop::new(RejectReason::CollaboratorError, format!("promotion failed: {e}"))
                    .with_details(details);
                return self.stop(&target_id, &job, stop).await;
            }
        };

        let cycle = self.transition(&target_id, CycleState::Promoted).await;
        self.bus
            .publish(
                Notification::new(
                    NotificationKind::Promoted,
                    &target_id,
                    format!("promoted {version} ({})", record.current_production_ref),
                    self.now(),
                )
                .with_request(request.id)
                .with_job(job.id)
                .with_cycle_start(cycle.and_then(|c| c.started_at))
                .with_details(details),
            )
            .await;

        if self.watch_health(&target_id).await {
            info!(%target_id, version = %version, "grace period passed, promotion stable");
            self.end_cycle(&target_id, None, Some(&job), None).await;
        } else {
            self.roll_back_unhealthy(&target_id, &job, &record).await;
        }
    }

    /// Refund, fail the job and either re-queue the request once or discard it.
    async fn defer_for_data(&self, request: RetrainRequest, mut job: TrainingJob, window_start: DateTime<Utc>) {
        let target_id = request.target_id.clone();
        let now = self.now();

        if let Err(e) = self.admission.refund(&target_id, window_start).await {
            error!(%target_id, error = %e, "failed to refund budget");
        }
        self.fail_job(&mut job, JobStatus::Failed, "data not ready").await;
        if let Err(e) = self.ports.jobs.complete_cycle(job.id, now).await {
            error!(%target_id, job_id = %job.id, error = %e, "failed to record cycle completion");
        }

        let retry = request
            .can_retry_data()
            .then(|| request.deferred(now + self.config.admission.data_not_ready_backoff()));

        let notification = {
            let mut board = self.board.lock().await;
            let started_at = board.cycles.get(&target_id).and_then(|c| c.started_at);

            if let Some(retry) = &retry {
                board.queue.upsert(retry.clone());
            }
            if let Some(cycle) = board.cycles.get_mut(&target_id) {
                if let Err(e) = cycle.reject(RejectReason::DataNotReady, now) {
                    error!(%target_id, error = %e, "invalid cycle transition");
                }
                info!(
                    %target_id,
                    request_id = %request.id,
                    job_id = %job.id,
                    state = %cycle.state,
                    reason = %RejectReason::DataNotReady,
                    "cycle transition"
                );
                cycle.job_id = None;
                let next = if retry.is_some() { CycleState::Queued } else { CycleState::Idle };
                super::log_transition(cycle, next, now);
            }

            let notification = match &retry {
                Some(retry) => Notification::new(
                    NotificationKind::Rejected,
                    &target_id,
                    "training data not ready; retrying once after backoff",
                    now,
                )
                .with_details(serde_json::json!({ "retry_at": retry.not_before })),
                None => Notification::new(
                    NotificationKind::RequestDiscarded,
                    &target_id,
                    "training data still not ready after retry; request discarded",
                    now,
                ),
            };
            notification
                .with_reason(RejectReason::DataNotReady)
                .with_request(request.id)
                .with_job(job.id)
                .with_cycle_start(started_at)
        };

        self.bus.publish(notification).await;
        self.wake();
    }

    async fn train(
        &self,
        request: &RetrainRequest,
        job: &mut TrainingJob,
        dataset_ref: String,
    ) -> Result<(String, ModelMetrics), Stop> {
        let target_id = request.target_id.as_str();
        let warm_start_ref = if self.config.training.warm_start {
            self.production_ref(target_id).await
        } else {
            None
        };

        let spec = JobSpec {
            job_id: job.id,
            target_id: target_id.to_string(),
            dataset_ref: dataset_ref.clone(),
            warm_start_ref,
        };

        let external_id = match self.ports.runner.submit(&spec).await {
            Ok(id) => id,
            Err(e) => {
                self.fail_job(job, JobStatus::Failed, &format!("submission failed: {e}")).await;
                return Err(Stop::new(RejectReason::CollaboratorError, format!("job submission failed: {e}")));
            }
        };

        if let Err(e) = job.start(external_id.clone(), self.now()) {
            error!(target_id, job_id = %job.id, error = %e, "failed to start job");
        }
        if let Err(e) = self.ports.jobs.update(job).await {
            // Also the path taken if another job of this target is already running.
            self.fail_job(job, JobStatus::Failed, &format!("could not record start: {e}")).await;
            return Err(Stop::new(RejectReason::CollaboratorError, format!("could not record job start: {e}")));
        }
        self.transition(target_id, CycleState::Training).await;
        info!(target_id, job_id = %job.id, %external_id, %dataset_ref, "training started");

        let max_duration = self.config.training.max_training_duration();
        let report = match tokio::time::timeout(max_duration, self.poll_until_terminal(&external_id)).await {
            Ok(report) => report,
            Err(_) => {
                let message = format!("exceeded max training duration of {}s", max_duration.as_secs());
                self.fail_job(job, JobStatus::TimedOut, &message).await;
                return Err(Stop::new(RejectReason::TimedOut, message));
            }
        };

        match report {
            JobReport {
                status: JobStatus::Succeeded,
                artifact_ref: Some(artifact_ref),
                metrics: Some(metrics),
                ..
            } => {
                if let Err(e) = job.transition_to(JobStatus::Succeeded, self.now()) {
                    error!(target_id, job_id = %job.id, error = %e, "invalid job transition");
                }
                if let Err(e) = self.ports.jobs.update(job).await {
                    error!(target_id, job_id = %job.id, error = %e, "failed to persist job");
                }
                info!(target_id, job_id = %job.id, %artifact_ref, mae = metrics.mae, "training succeeded");
                Ok((artifact_ref, metrics))
            }
            JobReport { status: JobStatus::TimedOut, message, .. } => {
                let message = message.unwrap_or_else(|| "runner reported timeout".to_string());
                self.fail_job(job, JobStatus::TimedOut, &message).await;
                Err(Stop::new(RejectReason::TimedOut, message))
            }
            JobReport { message, .. } => {
                let message = message.unwrap_or_else(|| "job failed without artifact".to_string());
                self.fail_job(job, JobStatus::Failed, &message).await;
                Err(Stop::new(RejectReason::TrainingFailure, message))
            }
        }
    }

    async fn poll_until_terminal(&self, external_id: &str) -> JobReport {
        let interval = self.config.training.poll_interval();
        loop {
            match self.ports.runner.poll(external_id).await {
                Ok(report) if report.status.is_terminal() => return report,
                Ok(_) => {}
                Err(e) => warn!(external_id, error = %e, "job poll failed"),
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Register the trained artifact as a candidate, evaluate it and the
    /// baseline on the same dataset, and run the gate.
    async fn validate(
        &self,
        request: &RetrainRequest,
        job: &TrainingJob,
        artifact_ref: String,
        metrics: ModelMetrics,
        dataset_ref: &str,
    ) -> Result<(ValidationResult, ModelVersion, CandidateModel), Stop> {
        let target_id = request.target_id.as_str();
        let version = ModelVersion::new(target_id, self.now(), TriggerKind::Drift, request.short_id());
        let label = version.to_string();

        let candidate_id = self
            .ports
            .registry
            .register(target_id, &artifact_ref, &metrics, &label)
            .await
            .map_err(|e| Stop::new(RejectReason::CollaboratorError, format!("candidate registration failed: {e}")))?;
        let candidate = CandidateModel {
            candidate_id,
            job_id: job.id,
            metrics,
            artifact_ref,
        };

        let baseline_ref = match self.promotion.bootstrap(target_id).await {
            Ok(record) => record.map(|r| r.current_production_ref),
            Err(e) => {
                return Err(Stop::new(RejectReason::CollaboratorError, format!("baseline lookup failed: {e}")));
            }
        };

        let candidate_report = self.evaluate(target_id, &candidate.artifact_ref, dataset_ref).await?;
        let baseline = match baseline_ref {
            Some(baseline_ref) => Some(self.evaluate(target_id, &baseline_ref, dataset_ref).await?),
            None => None,
        };

        let result = self
            .gate
            .evaluate(&candidate.candidate_id, baseline.as_ref(), &candidate_report);
        info!(
            target_id,
            candidate_id = %candidate.candidate_id,
            job_id = %candidate.job_id,
            decision = ?result.decision,
            delta = ?result.delta,
            p_value = ?result.p_value,
            reason = ?result.reject_reason,
            "validation gate decided"
        );
        Ok((result, version, candidate))
    }

    async fn evaluate(&self, target_id: &str, artifact_ref: &str, dataset_ref: &str) -> Result<EvaluationReport, Stop> {
        self.ports
            .evaluator
            .evaluate(target_id, artifact_ref, dataset_ref)
            .await
            .map_err(|e| {
                Stop::new(
                    RejectReason::CollaboratorError,
                    format!("evaluation of {artifact_ref} failed: {e}"),
                )
            })
    }

    /// Poll the health check through the grace period. `false` on the first
    /// unhealthy answer or failed check.
    async fn watch_health(&self, target_id: &str) -> bool {
        let grace = self.config.promotion.rollback_grace_period();
        if grace.is_zero() {
            return true;
        }
        let interval = self.config.promotion.health_poll_interval();
        let deadline = Instant::now() + grace;

        loop {
            match self.ports.health.check(target_id).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(target_id, "health check failed during grace period");
                    return false;
                }
                Err(e) => {
                    warn!(target_id, error = %e, "health check errored during grace period");
                    return false;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }

    async fn roll_back_unhealthy(&self, target_id: &str, job: &TrainingJob, promoted: &StabilityRecord) {
        self.transition(target_id, CycleState::RollingBack).await;

        match self.promotion.rollback(target_id).await {
            Ok(record) => {
                self.transition(target_id, CycleState::RolledBack).await;
                let notification = Notification::new(
                    NotificationKind::RolledBack,
                    target_id,
                    format!(
                        "health check failed; restored {} in place of {}",
                        record.current_production_ref, promoted.current_production_ref
                    ),
                    self.now(),
                )
                .with_details(serde_json::json!({
                    "restored_ref": record.current_production_ref,
                    "removed_ref": promoted.current_production_ref,
                }));
                self.end_cycle(target_id, None, Some(job), Some(notification)).await;
            }
            Err(PromotionError::NothingToRollBack(_)) => {
                warn!(target_id, "production already restored, nothing to roll back");
                self.end_cycle(target_id, None, Some(job), None).await;
            }
            Err(e) => {
                // The controller has already frozen the target.
                let notification = self.rollback_failure(target_id, &e).with_job(job.id);
                self.end_cycle(target_id, None, Some(job), Some(notification)).await;
            }
        }
    }

    pub(super) fn rollback_failure(&self, target_id: &str, error: &PromotionError) -> Notification {
        error!(target_id, error = %error, "rollback failed; promotions frozen until manually cleared");
        Notification::new(
            NotificationKind::RollbackFailure,
            target_id,
            format!("rollback failed, promotions frozen: {error}"),
            self.now(),
        )
    }

    async fn stop(&self, target_id: &str, job: &TrainingJob, stop: Stop) {
        warn!(target_id, job_id = %job.id, reason = %stop.reason, message = %stop.message, "retrain cycle rejected");
        let notification = Notification::new(NotificationKind::Rejected, target_id, stop.message, self.now())
            .with_reason(stop.reason)
            .with_job(job.id)
            .with_details(stop.details);
        self.end_cycle(target_id, Some(stop.reason), Some(job), Some(notification)).await;
    }

    async fn fail_job(&self, job: &mut TrainingJob, status: JobStatus, reason: &str) {
        if let Err(e) = job.fail(status, reason, self.now()) {
            error!(target_id = %job.target_id, job_id = %job.id, error = %e, "invalid job transition");
            return;
        }
        if let Err(e) = self.ports.jobs.update(job).await {
            error!(target_id = %job.target_id, job_id = %job.id, error = %e, "failed to persist job");
        }
    }

    /// The model serving `target_id`, preferring the stability record.
    async fn production_ref(&self, target_id: &str) -> Option<String> {
        match self.ports.stability.get(target_id).await {
            Ok(Some(record)) => return Some(record.current_production_ref),
            Ok(None) => {}
            Err(e) => warn!(target_id, error = %e, "stability lookup failed"),
        }
        match self.ports.registry.get_production(target_id).await {
            Ok(production) => production,
            Err(e) => {
                warn!(target_id, error = %e, "registry lookup failed, training without warm start");
                None
            }
        }
    }
}

fn validation_details(result: &ValidationResult, version: &ModelVersion, candidate: &CandidateModel) -> serde_json::Value {
    serde_json::json!({
        "version": version.to_string(),
        "candidate_id": candidate.candidate_id,
        "artifact_ref": candidate.artifact_ref,
        "job_id": candidate.job_id,
        "baseline_metrics": result.baseline_metrics,
        "candidate_metrics": result.candidate_metrics,
        "delta": result.delta,
        "p_value": result.p_value,
    })
}
