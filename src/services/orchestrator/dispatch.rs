//! Admission loop: drains the request queue into running cycles.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{log_transition, Orchestrator};
use crate::domain::models::{CycleState, Notification, NotificationKind, RejectReason, RetrainRequest};
use crate::services::admission::AdmissionOutcome;

/// Upper bound on how long the loop sleeps without a wake-up.
const IDLE_RESCAN: Duration = Duration::from_secs(60);

impl Orchestrator {
    /// Run the dispatch loop until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            ceiling = self.admission.ceiling(),
            "orchestrator dispatch loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = self.dispatch_pending().await;
            if started > 0 {
                debug!(started, "dispatch pass started cycles");
            }
            self.reap_finished_cycles();

            let sleep_for = {
                let now = self.now();
                let board = self.board.lock().await;
                board
                    .queue
                    .next_eligible_at(now)
                    .and_then(|at| (at - now).to_std().ok())
                    .map_or(IDLE_RESCAN, |d| d.min(IDLE_RESCAN))
            };

            tokio::select! {
                () = self.wake.notified() => {}
                () = tokio::time::sleep(sleep_for) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("orchestrator dispatch loop stopped");
    }

    /// Admit as many eligible queued requests as budget and slots allow.
    ///
    /// Each target is handled under its own lock, so a slow store round-trip
    /// for one target never holds the queue for the others. A failure for
    /// one request leaves it queued and the pass moves on.
    ///
    /// Returns the number of cycles started.
    pub async fn dispatch_pending(&self) -> usize {
        let now = self.now();
        let mut started = 0;

        let targets: Vec<String> = {
            let board = self.board.lock().await;
            board
                .queue
                .iter()
                .filter(|r| r.is_eligible(now))
                .map(|r| r.target_id.clone())
                .collect()
        };

        for target_id in targets {
            let target_lock = self.target_lock(&target_id);
            let _serial = target_lock.lock().await;

            // Intake may have coalesced or superseded the request since the snapshot.
            let Some(request) = self
                .board
                .lock()
                .await
                .queue
                .get(&target_id)
                .filter(|r| r.is_eligible(now))
                .cloned()
            else {
                continue;
            };

            match self.promotion.frozen_reason(&target_id).await {
                Ok(Some(reason)) => {
                    let notification = Notification::new(
                        NotificationKind::RequestDiscarded,
                        &target_id,
                        format!("promotions frozen: {reason}"),
                        now,
                    )
                    .with_reason(RejectReason::PromotionFrozen)
                    .with_request(request.id);
                    self.discard_request(&request, RejectReason::PromotionFrozen, notification).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(%target_id, request_id = %request.id, error = %e, "freeze check failed, request stays queued");
                    continue;
                }
            }

            let outcome = match self.admission.try_admit(&request, now).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(%target_id, request_id = %request.id, error = %e, "admission failed, request stays queued");
                    continue;
                }
            };

            match outcome {
                AdmissionOutcome::NoSlot => {
                    debug!(%target_id, "all training slots busy");
                    break;
                }
                AdmissionOutcome::WindowRolledOver => {
                    let notification = Notification::new(
                        NotificationKind::RequestDiscarded,
                        &target_id,
                        "budget window rolled over while queued; a fresh drift event is required",
                        now,
                    )
                    .with_reason(RejectReason::WindowRolledOver)
                    .with_request(request.id)
                    .with_details(serde_json::json!({ "request_window_start": request.window_start }));
                    self.discard_request(&request, RejectReason::WindowRolledOver, notification).await;
                }
                AdmissionOutcome::BudgetExhausted(budget) => {
                    let notification = Notification::new(
                        NotificationKind::BudgetExhausted,
                        &target_id,
                        format!(
                            "retrain budget exhausted ({}/{}) until {}",
                            budget.retrains_used, budget.retrains_cap, budget.window_end
                        ),
                        now,
                    )
                    .with_reason(RejectReason::BudgetExhausted)
                    .with_request(request.id)
                    .with_details(serde_json::to_value(&budget).unwrap_or_default());
                    self.discard_request(&request, RejectReason::BudgetExhausted, notification).await;
                }
                AdmissionOutcome::Admitted(admission) => {
                    {
                        let mut board = self.board.lock().await;
                        board.queue.remove_by_id(request.id);
                        if let Some(cycle) = board.cycles.get_mut(&target_id) {
                            cycle.job_id = Some(admission.job.id);
                            log_transition(cycle, CycleState::Admitted, now);
                        }
                    }

                    let this = self.clone();
                    self.tasks
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .spawn(async move { this.run_cycle(request, admission).await });
                    started += 1;
                }
            }
        }

        started
    }

    /// Drop a queued request, reject its cycle with `reason` and publish
    /// `notification`.
    async fn discard_request(&self, request: &RetrainRequest, reason: RejectReason, notification: Notification) {
        let now = self.now();
        {
            let mut board = self.board.lock().await;
            board.queue.remove_by_id(request.id);
            if let Some(cycle) = board.cycles.get_mut(&request.target_id) {
                discard(cycle, reason, now);
            }
        }
        self.bus.publish(notification).await;
    }

    fn reap_finished_cycles(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(error = %e, "retrain cycle task panicked");
                }
            }
        }
    }

    /// Abort in-flight cycles and wait for them to stop.
    ///
    /// Jobs left `Running` are marked `TimedOut` by [`Orchestrator::recover`]
    /// on the next start.
    pub async fn shutdown(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        let in_flight = tasks.len();
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        info!(in_flight, "orchestrator shut down");
    }

    /// Wait until every spawned cycle has finished.
    pub async fn wait_for_cycles(&self) {
        loop {
            let mut tasks = {
                let mut guard = self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                std::mem::take(&mut *guard)
            };
            if tasks.is_empty() {
                return;
            }
            while tasks.join_next().await.is_some() {}
        }
    }
}

/// Drop a queued request's cycle back to `Idle` with `reason`.
fn discard(cycle: &mut crate::domain::models::TargetCycle, reason: RejectReason, now: chrono::DateTime<chrono::Utc>) {
    match cycle.reject(reason, now) {
        Ok(previous) => info!(
            target_id = %cycle.target_id,
            request_id = ?cycle.request_id,
            from = %previous,
            state = %cycle.state,
            %reason,
            "cycle transition"
        ),
        Err(e) => error!(target_id = %cycle.target_id, error = %e, "invalid cycle transition"),
    }
    log_transition(cycle, CycleState::Idle, now);
}
