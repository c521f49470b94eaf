//! Restart recovery, manual rollback and the rollback-failure freeze.

mod common;

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::{eventually, test_config, Harness};
use driftloop::adapters::sqlite::SqliteBudgetRepository;
use driftloop::domain::models::{
    CycleState, IntakeDecision, JobStatus, NotificationKind, NotificationSeverity, RejectReason,
    TrainingJob,
};
use driftloop::domain::ports::{BudgetRepository, Clock};
use driftloop::services::{OrchestratorError, PromotionError};
use uuid::Uuid;

/// Harness with one promoted candidate on top of `eta/prod-v1`.
async fn promoted() -> Harness {
    let mut config = test_config();
    config.intake.cooldown_seconds = 0;
    let h = Harness::new(config).await;
    h.with_production("eta", "eta/prod-v1", 0.10);

    h.submit("eta", 0.9).await;
    h.run_cycles().await;
    assert_eq!(h.backend.registry.production("eta").as_deref(), Some("eta/candidate-1"));
    h
}

#[tokio::test]
async fn test_bootstrap_records_registry_baseline() {
    let h = Harness::new(test_config()).await;
    h.with_production("eta", "eta/prod-v1", 0.10);

    let record = h.orchestrator.bootstrap_target("eta").await.unwrap().unwrap();
    assert_eq!(record.current_production_ref, "eta/prod-v1");
    assert!(record.previous_stable_ref.is_none());

    assert!(h.orchestrator.bootstrap_target("unknown").await.unwrap().is_none());
}

#[tokio::test]
async fn test_manual_rollback_restores_previous_model() {
    let h = promoted().await;

    let record = h.orchestrator.rollback_target("eta").await.unwrap();
    assert_eq!(record.current_production_ref, "eta/prod-v1");
    assert_eq!(h.backend.registry.production("eta").as_deref(), Some("eta/prod-v1"));

    let last = h.channel.notifications().pop().unwrap();
    assert_eq!(last.kind, NotificationKind::RolledBack);
    assert_eq!(last.details["manual"], true);

    // Only the most recent promotion can be undone.
    let err = h.orchestrator.rollback_target("eta").await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Promotion(PromotionError::NothingToRollBack(_))
    ));
}

#[tokio::test]
async fn test_rollback_of_unknown_target() {
    let h = Harness::new(test_config()).await;

    let err = h.orchestrator.rollback_target("ghost").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownTarget(t) if t == "ghost"));
    assert!(h.kinds().is_empty());
}

// A failed rollback freezes promotions; queued requests are discarded until
// an operator unfreezes the target.
#[tokio::test]
async fn test_failed_rollback_freezes_until_unfrozen() {
    let h = promoted().await;
    h.backend.registry.fail_set_production(true);

    let err = h.orchestrator.rollback_target("eta").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Promotion(PromotionError::Registry(_))));

    let failure = h.channel.notifications().pop().unwrap();
    assert_eq!(failure.kind, NotificationKind::RollbackFailure);
    assert_eq!(failure.severity, NotificationSeverity::Critical);

    let status = h.orchestrator.target_status("eta").await.unwrap();
    let record = status.stability.unwrap();
    assert!(record.frozen);
    assert!(record.frozen_reason.unwrap().contains("rollback failed"));
    assert_eq!(record.current_production_ref, "eta/candidate-1");

    h.backend.registry.fail_set_production(false);
    assert!(matches!(h.submit("eta", 0.9).await, IntakeDecision::Accepted { .. }));
    assert_eq!(h.run_cycles().await, 0);
    let discarded = h.channel.notifications().pop().unwrap();
    assert_eq!(discarded.kind, NotificationKind::RequestDiscarded);
    assert_eq!(discarded.reason, Some(RejectReason::PromotionFrozen));

    // Manual rollback is still allowed while frozen.
    let record = h.orchestrator.rollback_target("eta").await.unwrap();
    assert_eq!(record.current_production_ref, "eta/prod-v1");
    assert!(record.frozen);

    let record = h.orchestrator.unfreeze_target("eta").await.unwrap();
    assert!(!record.frozen);
    assert!(record.frozen_reason.is_none());
    assert_eq!(h.kinds().last(), Some(&NotificationKind::Unfrozen));

    assert!(matches!(h.submit("eta", 0.9).await, IntakeDecision::Accepted { .. }));
    assert_eq!(h.run_cycles().await, 1);
}

// The stability store cannot be read when the operator rolls back: the
// target is frozen all the same and the failure is raised.
#[tokio::test]
async fn test_manual_rollback_store_failure_freezes_target() {
    let h = promoted().await;

    h.backend.store.fail_reads(true);
    let err = h.orchestrator.rollback_target("eta").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Promotion(PromotionError::Store(_))));
    h.backend.store.fail_reads(false);

    let failure = h.channel.notifications().pop().unwrap();
    assert_eq!(failure.kind, NotificationKind::RollbackFailure);
    assert_eq!(failure.severity, NotificationSeverity::Critical);

    let record = h.orchestrator.target_status("eta").await.unwrap().stability.unwrap();
    assert!(record.frozen);
    assert_eq!(h.backend.registry.production("eta").as_deref(), Some("eta/candidate-1"));

    assert!(matches!(h.submit("eta", 0.9).await, IntakeDecision::Accepted { .. }));
    assert_eq!(h.run_cycles().await, 0);
    assert_eq!(
        h.channel.notifications().pop().unwrap().reason,
        Some(RejectReason::PromotionFrozen)
    );
}

#[tokio::test]
async fn test_unfreeze_unknown_target() {
    let h = Harness::new(test_config()).await;

    let err = h.orchestrator.unfreeze_target("ghost").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownTarget(_)));
}

#[tokio::test]
async fn test_recover_times_out_jobs_running_at_shutdown() {
    let h = Harness::new(test_config()).await;
    h.backend.runner.hang_jobs("eta");

    h.submit("eta", 0.9).await;
    assert_eq!(h.orchestrator.dispatch_pending().await, 1);
    let orchestrator = &h.orchestrator;
    assert!(
        eventually(
            || async move { matches!(orchestrator.cycle("eta").await, Some(c) if c.state == CycleState::Training) },
            Duration::from_secs(5),
        )
        .await
    );
    h.orchestrator.shutdown().await;

    let restarted = h.restart();
    assert_eq!(restarted.recover().await.unwrap(), 1);

    let status = restarted.target_status("eta").await.unwrap();
    assert_eq!(status.cycle.state, CycleState::Idle);
    assert_eq!(status.recent_jobs[0].status, JobStatus::TimedOut);
    assert!(status.recent_jobs[0].cycle_completed_at.is_some());
    // The job really ran, so its retrain stays spent.
    assert_eq!(status.budget.retrains_used, 1);

    let recovered = h.channel.notifications().pop().unwrap();
    assert_eq!(recovered.kind, NotificationKind::JobRecovered);
    assert_eq!(recovered.reason, Some(RejectReason::TimedOut));

    assert_eq!(restarted.recover().await.unwrap(), 0);
}

#[tokio::test]
async fn test_recover_fails_and_refunds_unsubmitted_jobs() {
    let h = Harness::new(test_config()).await;
    let budgets = SqliteBudgetRepository::new(h.pool.clone());
    let now = h.clock.now();
    let window = h.config.admission.window_policy().window_for(now);

    let job = TrainingJob::new("eta", Uuid::new_v4(), now);
    let budget = budgets.admit(window, 3, &job).await.unwrap().unwrap();
    assert_eq!(budget.retrains_used, 1);

    h.clock.advance(ChronoDuration::minutes(5));
    let restarted = h.restart();
    assert_eq!(restarted.recover().await.unwrap(), 1);

    let status = restarted.target_status("eta").await.unwrap();
    assert_eq!(status.budget.retrains_used, 0);
    assert_eq!(status.recent_jobs[0].id, job.id);
    assert_eq!(status.recent_jobs[0].status, JobStatus::Failed);
    assert_eq!(h.kinds(), vec![NotificationKind::JobRecovered]);
}
