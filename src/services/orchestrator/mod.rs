//! Orchestrator core: the per-target retrain state machine.
//!
//! The orchestrator is a thin coordinator over the services it owns:
//!
//! - **types**: ports bundle, errors and status snapshots
//! - **dispatch**: the admission loop that drains the request queue
//! - **cycle**: one admitted cycle from data readiness to health watch
//! - **operator**: recovery, bootstrap, manual rollback/unfreeze, status

pub mod types;
mod cycle;
mod dispatch;
mod operator;

pub use types::{
    OrchestratorError, OrchestratorHealth, OrchestratorPorts, OrchestratorResult, TargetStatus,
};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::domain::models::{
    Config, CycleState, DriftEvent, IntakeDecision, Notification, NotificationKind, RejectReason,
    TargetCycle, TrainingJob,
};
use crate::services::admission::AdmissionController;
use crate::services::intake::DriftIntake;
use crate::services::notification_bus::NotificationBus;
use crate::services::promotion::PromotionController;
use crate::services::validation_gate::ValidationGate;
use types::Board;

/// Drives drift events through intake, admission, training, validation
/// and promotion for every target. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    pub(super) config: Arc<Config>,
    pub(super) ports: OrchestratorPorts,
    pub(super) intake: Arc<DriftIntake>,
    pub(super) admission: Arc<AdmissionController>,
    pub(super) gate: Arc<ValidationGate>,
    pub(super) promotion: Arc<PromotionController>,
    pub(super) bus: Arc<NotificationBus>,
    pub(super) board: Arc<Mutex<Board>>,
    /// Serializes intake and admission per target across store round-trips;
    /// the board lock itself is only held for in-memory updates.
    pub(super) target_locks: Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    pub(super) wake: Arc<Notify>,
    pub(super) tasks: Arc<std::sync::Mutex<JoinSet<()>>>,
}

impl Orchestrator {
    pub fn new(config: Config, ports: OrchestratorPorts, bus: Arc<NotificationBus>) -> Self {
        let intake = DriftIntake::new(
            config.intake.clone(),
            config.admission.window_policy(),
            ports.jobs.clone(),
            ports.audit.clone(),
        );
        let admission = AdmissionController::new(&config.admission, ports.budgets.clone());
        let gate = ValidationGate::new(config.validation.clone());
        let promotion = PromotionController::new(
            ports.stability.clone(),
            ports.registry.clone(),
            ports.clock.clone(),
            config.promotion.conflict_retry_max_elapsed(),
        );

        Self {
            config: Arc::new(config),
            ports,
            intake: Arc::new(intake),
            admission: Arc::new(admission),
            gate: Arc::new(gate),
            promotion: Arc::new(promotion),
            bus,
            board: Arc::new(Mutex::new(Board::default())),
            target_locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
            wake: Arc::new(Notify::new()),
            tasks: Arc::new(std::sync::Mutex::new(JoinSet::new())),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    pub fn promotion(&self) -> &PromotionController {
        &self.promotion
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.bus.subscribe()
    }

    /// Ask the dispatch loop to look at the queue again.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub(super) fn target_lock(&self, target_id: &str) -> Arc<Mutex<()>> {
        self.target_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(target_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(super) fn now(&self) -> DateTime<Utc> {
        self.ports.clock.now()
    }

    /// Validate a drift event and run it through intake.
    pub async fn submit_event(&self, event: DriftEvent) -> OrchestratorResult<IntakeDecision> {
        event.validate()?;
        let target_id = event.target_id.clone();
        let target_lock = self.target_lock(&target_id);
        let _serial = target_lock.lock().await;

        let stored_completion = self.intake.last_completion(&event).await?;
        let now = self.now();

        let mut notifications = Vec::new();
        let outcome = {
            let mut board = self.board.lock().await;
            let Board { queue, cycles } = &mut *board;
            let current = cycles.get(&target_id);
            let in_flight = current.is_some_and(|c| c.state.is_in_flight());
            // The in-memory stamp covers a completion the store has not recorded yet.
            let last_completion = stored_completion.max(current.and_then(|c| c.last_completed_at));

            let outcome = self.intake.decide(&event, queue, in_flight, last_completion, now);
            let cycle = cycles
                .entry(target_id.clone())
                .or_insert_with(|| TargetCycle::idle(target_id.clone(), now));

            match outcome.decision {
                IntakeDecision::Accepted { request_id } => {
                    log_transition(cycle, CycleState::Triggered, now);
                    cycle.request_id = Some(request_id);
                    log_transition(cycle, CycleState::Queued, now);
                }
                IntakeDecision::Superseded { request_id, replaced } => {
                    // The stale request is canceled and the cycle restarts around the new one.
                    log_transition(cycle, CycleState::Idle, now);
                    log_transition(cycle, CycleState::Triggered, now);
                    cycle.request_id = Some(request_id);
                    log_transition(cycle, CycleState::Queued, now);
                    notifications.push(
                        Notification::new(
                            NotificationKind::Superseded,
                            &target_id,
                            format!("pending request {replaced} superseded by {request_id}"),
                            now,
                        )
                        .with_reason(RejectReason::Superseded)
                        .with_request(request_id)
                        .with_cycle_start(cycle.started_at)
                        .with_details(serde_json::json!({ "replaced_request_id": replaced })),
                    );
                }
                IntakeDecision::Ignored | IntakeDecision::Coalesced { .. } | IntakeDecision::InCooldown => {}
            }
            outcome
        };

        self.intake.record(&event, &outcome, now).await;
        let decision = outcome.decision;
        for notification in notifications {
            self.bus.publish(notification).await;
        }
        if decision.request_id().is_some() {
            self.wake();
        }
        Ok(decision)
    }

    /// Current cycle of `target_id`, if the target has been seen.
    pub async fn cycle(&self, target_id: &str) -> Option<TargetCycle> {
        self.board.lock().await.cycles.get(target_id).cloned()
    }

    /// Move a target's cycle to `next`, returning the updated cycle.
    pub(super) async fn transition(&self, target_id: &str, next: CycleState) -> Option<TargetCycle> {
        let now = self.now();
        let mut board = self.board.lock().await;
        let cycle = board.cycles.get_mut(target_id)?;
        log_transition(cycle, next, now);
        Some(cycle.clone())
    }

    /// Close a cycle: stamp the job's cycle completion for cooldown,
    /// optionally reject the cycle, return it to `Idle` and publish the
    /// notification.
    ///
    /// The completion is stored before the cycle leaves its in-flight state,
    /// and stamped on the cycle in the same board update that returns it to
    /// `Idle`, so no event observes an idle target without its cooldown.
    pub(super) async fn end_cycle(
        &self,
        target_id: &str,
        reason: Option<RejectReason>,
        job: Option<&TrainingJob>,
        notification: Option<Notification>,
    ) {
        let now = self.now();
        let job_id = job.map(|j| j.id);
        if let Some(job_id) = job_id {
            if let Err(e) = self.ports.jobs.complete_cycle(job_id, now).await {
                error!(target_id, %job_id, error = %e, "failed to record cycle completion");
            }
        }

        let (started_at, request_id) = {
            let mut board = self.board.lock().await;
            match board.cycles.get_mut(target_id) {
                Some(cycle) => {
                    if job.is_some_and(|j| j.started_at.is_some()) {
                        cycle.mark_completed(now);
                    }
                    if let Some(reason) = reason {
                        if let Err(e) = cycle.reject(reason, now) {
                            error!(target_id, error = %e, "invalid cycle transition");
                        } else {
                            info!(
                                target_id,
                                request_id = ?cycle.request_id,
                                job_id = ?cycle.job_id,
                                state = %cycle.state,
                                %reason,
                                "cycle transition"
                            );
                        }
                    }
                    let started_at = cycle.started_at;
                    let request_id = cycle.request_id;
                    log_transition(cycle, CycleState::Idle, now);
                    (started_at, request_id)
                }
                None => (None, None),
            }
        };

        if let Some(mut notification) = notification {
            notification = notification.with_cycle_start(started_at);
            if notification.request_id.is_none() {
                notification.request_id = request_id;
            }
            if notification.job_id.is_none() {
                notification.job_id = job_id;
            }
            self.bus.publish(notification).await;
        }
        self.wake();
    }
}

/// Apply a transition and log it; invalid transitions are logged and skipped.
pub(super) fn log_transition(cycle: &mut TargetCycle, next: CycleState, at: DateTime<Utc>) {
    match cycle.transition_to(next, at) {
        Ok(previous) => info!(
            target_id = %cycle.target_id,
            request_id = ?cycle.request_id,
            job_id = ?cycle.job_id,
            from = %previous,
            state = %next,
            "cycle transition"
        ),
        Err(e) => error!(target_id = %cycle.target_id, error = %e, "invalid cycle transition"),
    }
}
