//! End-to-end retrain cycles driven through the orchestrator with scripted
//! collaborators.

mod common;

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::{eventually, test_config, Harness};
use driftloop::domain::models::{
    CycleState, IntakeDecision, JobStatus, NotificationKind, NotificationSeverity, RejectReason,
};
use driftloop::domain::ports::Clock;

const WAIT: Duration = Duration::from_secs(5);

// A 0.85 event opens a request and a 0.9 event two minutes later folds into it.
#[tokio::test]
async fn test_debounce_coalesces_into_single_request() {
    let h = Harness::new(test_config()).await;

    let first = h.submit("eta", 0.85).await;
    let IntakeDecision::Accepted { request_id } = first else {
        panic!("expected accepted, got {first:?}");
    };

    h.clock.advance(ChronoDuration::seconds(120));
    let second = h.submit("eta", 0.9).await;
    assert_eq!(second, IntakeDecision::Coalesced { request_id });

    let status = h.orchestrator.target_status("eta").await.unwrap();
    let pending = status.pending_request.expect("request should be pending");
    assert_eq!(pending.id, request_id);
    assert!((pending.trigger_severity - 0.9).abs() < f64::EPSILON);
    assert_eq!(pending.coalesced_count, 2);
    assert_eq!(status.cycle.state, CycleState::Queued);
    assert_eq!(h.orchestrator.health().await.queued_requests, 1);

    let decisions: Vec<_> = h.audit.entries().iter().map(|e| e.decision).collect();
    assert_eq!(decisions, vec![first, second]);
}

#[tokio::test]
async fn test_event_below_threshold_is_ignored() {
    let h = Harness::new(test_config()).await;

    assert_eq!(h.submit("eta", 0.5).await, IntakeDecision::Ignored);
    assert_eq!(h.orchestrator.health().await.queued_requests, 0);
    assert_eq!(h.audit.entries().len(), 1);
}

// Ceiling 2 with three queued targets: two train, the third waits for a slot.
#[tokio::test]
async fn test_concurrency_ceiling_holds_third_request() {
    let mut config = test_config();
    config.admission.resource_concurrency_ceiling = 2;
    let h = Harness::new(config).await;

    for target in ["a", "b", "c"] {
        h.backend.runner.hold(target);
    }
    h.submit("a", 0.95).await;
    h.submit("b", 0.9).await;
    h.submit("c", 0.8).await;

    assert_eq!(h.orchestrator.dispatch_pending().await, 2);
    let orchestrator = &h.orchestrator;
    assert!(
        eventually(
            || async move {
                matches!(orchestrator.cycle("a").await, Some(c) if c.state == CycleState::Training)
                    && matches!(orchestrator.cycle("b").await, Some(c) if c.state == CycleState::Training)
            },
            WAIT,
        )
        .await
    );
    assert_eq!(h.orchestrator.cycle("c").await.unwrap().state, CycleState::Queued);
    assert_eq!(h.backend.runner.running(), 2);
    assert_eq!(h.orchestrator.dispatch_pending().await, 0);

    h.backend.runner.release("a");
    assert!(eventually(|| async move { orchestrator.health().await.available_slots == 1 }, WAIT).await);

    assert_eq!(h.orchestrator.dispatch_pending().await, 1);
    assert!(
        eventually(
            || async move { matches!(orchestrator.cycle("c").await, Some(c) if c.state == CycleState::Training) },
            WAIT,
        )
        .await
    );

    h.backend.runner.release("b");
    h.backend.runner.release("c");
    h.orchestrator.wait_for_cycles().await;
    assert_eq!(h.backend.runner.max_concurrent(), 2);
    assert_eq!(h.orchestrator.health().await.available_slots, 2);
}

// Candidate 0.09 against baseline 0.10 is a 10% improvement on a consistent
// per-sample gain.
#[tokio::test]
async fn test_improving_candidate_is_promoted() {
    let h = Harness::new(test_config()).await;
    h.with_production("eta", "eta/prod-v1", 0.10);
    h.backend.evaluator.set_fallback_mae(0.09);

    h.submit("eta", 0.9).await;
    assert_eq!(h.run_cycles().await, 1);

    let status = h.orchestrator.target_status("eta").await.unwrap();
    let record = status.stability.expect("stability record");
    assert_eq!(record.current_production_ref, "eta/candidate-1");
    assert_eq!(record.previous_stable_ref.as_deref(), Some("eta/prod-v1"));
    assert_eq!(record.promoted_at, Some(h.clock.now()));
    assert_eq!(h.backend.registry.production("eta").as_deref(), Some("eta/candidate-1"));

    assert_eq!(status.cycle.state, CycleState::Idle);
    assert_eq!(status.cycle.last_reason, None);
    assert_eq!(status.recent_jobs.len(), 1);
    assert_eq!(status.recent_jobs[0].status, JobStatus::Succeeded);
    assert!(status.recent_jobs[0].cycle_completed_at.is_some());
    assert_eq!(status.budget.retrains_used, 1);

    let promoted = h
        .channel
        .notifications()
        .into_iter()
        .find(|n| n.kind == NotificationKind::Promoted)
        .expect("promotion notification");
    let delta = promoted.details["delta"].as_f64().unwrap();
    let p_value = promoted.details["p_value"].as_f64().unwrap();
    assert!((delta - 0.1).abs() < 1e-9, "delta was {delta}");
    assert!(p_value < 0.05);
    assert!(promoted.cycle_started_at.is_some());

    let versions = h.backend.registry.registered_versions();
    assert_eq!(versions.len(), 1);
    assert!(versions[0].starts_with("eta_20260307140000_drift_"));

    // The production model seeded the job as a warm start.
    let submitted = h.backend.runner.submitted();
    assert_eq!(submitted[0].warm_start_ref.as_deref(), Some("eta/prod-v1"));
    assert_eq!(submitted[0].dataset_ref, "snapshots/eta/latest");
}

#[tokio::test]
async fn test_regressing_candidate_is_rejected() {
    let h = Harness::new(test_config()).await;
    h.with_production("eta", "eta/prod-v1", 0.10);
    h.backend.evaluator.set_fallback_mae(0.105);

    h.submit("eta", 0.9).await;
    h.run_cycles().await;

    let status = h.orchestrator.target_status("eta").await.unwrap();
    let record = status.stability.expect("baseline recorded");
    assert_eq!(record.current_production_ref, "eta/prod-v1");
    assert_eq!(record.previous_stable_ref, None);
    assert_eq!(record.promoted_at, None);
    assert_eq!(h.backend.registry.production("eta").as_deref(), Some("eta/prod-v1"));

    assert_eq!(status.cycle.state, CycleState::Idle);
    assert_eq!(status.cycle.last_reason, Some(RejectReason::ValidationRegression));

    let rejected = h
        .channel
        .notifications()
        .into_iter()
        .find(|n| n.kind == NotificationKind::Rejected)
        .expect("rejection notification");
    assert_eq!(rejected.reason, Some(RejectReason::ValidationRegression));
    assert!(rejected.details["delta"].as_f64().unwrap() < 0.0);
    assert!(!h.kinds().contains(&NotificationKind::Promoted));
}

#[tokio::test]
async fn test_small_eval_set_is_rejected() {
    let h = Harness::new(test_config()).await;
    h.with_production("eta", "eta/prod-v1", 0.10);
    h.backend.evaluator.set_sample_count(10);

    h.submit("eta", 0.9).await;
    h.run_cycles().await;

    let cycle = h.orchestrator.cycle("eta").await.unwrap();
    assert_eq!(cycle.last_reason, Some(RejectReason::InsufficientEvalData));
    assert_eq!(h.backend.registry.production("eta").as_deref(), Some("eta/prod-v1"));
}

#[tokio::test]
async fn test_target_without_production_model_is_rejected() {
    let h = Harness::new(test_config()).await;

    h.submit("eta", 0.9).await;
    h.run_cycles().await;

    let status = h.orchestrator.target_status("eta").await.unwrap();
    assert_eq!(status.cycle.last_reason, Some(RejectReason::MissingBaseline));
    assert!(status.stability.is_none());
    assert_eq!(h.backend.registry.production("eta"), None);
}

// Health fails inside the grace period: the previous model is restored.
#[tokio::test]
async fn test_unhealthy_promotion_is_rolled_back() {
    let mut config = test_config();
    config.promotion.rollback_grace_period_secs = 1;
    config.promotion.health_poll_interval_secs = 1;
    let h = Harness::new(config).await;
    h.with_production("eta", "eta/prod-v1", 0.10);
    h.backend.health.set_healthy("eta", false);

    h.submit("eta", 0.9).await;
    h.run_cycles().await;

    let status = h.orchestrator.target_status("eta").await.unwrap();
    let record = status.stability.expect("stability record");
    assert_eq!(record.current_production_ref, "eta/prod-v1");
    assert!(!record.frozen);
    assert_eq!(h.backend.registry.production("eta").as_deref(), Some("eta/prod-v1"));
    assert_eq!(status.cycle.state, CycleState::Idle);
    assert!(h.backend.health.checks() >= 1);

    let notifications = h.channel.notifications();
    let kinds: Vec<_> = notifications.iter().map(|n| n.kind).collect();
    assert_eq!(kinds, vec![NotificationKind::Promoted, NotificationKind::RolledBack]);
    let rolled_back = &notifications[1];
    assert!(rolled_back.is_alert());
    assert_eq!(rolled_back.details["restored_ref"], "eta/prod-v1");
    assert_eq!(rolled_back.details["removed_ref"], "eta/candidate-1");
    assert!(notifications[0].sequence < rolled_back.sequence);
}

// Health fails and the registry refuses to restore the previous model:
// promotions stay frozen until an operator clears them.
#[tokio::test]
async fn test_failed_health_rollback_freezes_target() {
    let mut config = test_config();
    config.promotion.rollback_grace_period_secs = 1;
    config.promotion.health_poll_interval_secs = 1;
    config.intake.cooldown_seconds = 0;
    let h = Harness::new(config).await;
    h.with_production("eta", "eta/prod-v1", 0.10);
    h.backend.health.set_healthy("eta", false);
    // The promotion goes through, the rollback does not.
    h.backend.registry.fail_set_production_after(1);

    h.submit("eta", 0.9).await;
    h.run_cycles().await;

    assert_eq!(
        h.kinds(),
        vec![NotificationKind::Promoted, NotificationKind::RollbackFailure]
    );
    let failure = h.channel.notifications().pop().unwrap();
    assert_eq!(failure.severity, NotificationSeverity::Critical);
    assert!(failure.job_id.is_some());

    let status = h.orchestrator.target_status("eta").await.unwrap();
    let record = status.stability.expect("stability record");
    assert!(record.frozen);
    assert_eq!(record.current_production_ref, "eta/candidate-1");
    assert_eq!(status.cycle.state, CycleState::Idle);

    h.backend.health.set_healthy("eta", true);
    assert!(matches!(h.submit("eta", 0.9).await, IntakeDecision::Accepted { .. }));
    assert_eq!(h.run_cycles().await, 0);
    let discarded = h.channel.notifications().pop().unwrap();
    assert_eq!(discarded.kind, NotificationKind::RequestDiscarded);
    assert_eq!(discarded.reason, Some(RejectReason::PromotionFrozen));
    assert_eq!(h.backend.runner.submitted().len(), 1);
}

#[tokio::test]
async fn test_healthy_promotion_survives_grace_period() {
    let mut config = test_config();
    config.promotion.rollback_grace_period_secs = 1;
    config.promotion.health_poll_interval_secs = 1;
    let h = Harness::new(config).await;
    h.with_production("eta", "eta/prod-v1", 0.10);

    h.submit("eta", 0.9).await;
    h.run_cycles().await;

    assert_eq!(h.backend.registry.production("eta").as_deref(), Some("eta/candidate-1"));
    assert_eq!(h.kinds(), vec![NotificationKind::Promoted]);
    assert!(h.backend.health.checks() >= 2);
}

// Cap 3: the fourth qualifying event is logged but its request is discarded
// until the window resets.
#[tokio::test]
async fn test_budget_exhaustion_until_window_reset() {
    let mut config = test_config();
    config.admission.max_weekend_retrains = 3;
    config.intake.cooldown_seconds = 0;
    let h = Harness::new(config).await;
    h.with_production("eta", "eta/prod-v1", 0.10);

    for _ in 0..3 {
        assert!(matches!(h.submit("eta", 0.9).await, IntakeDecision::Accepted { .. }));
        assert_eq!(h.run_cycles().await, 1);
    }
    let status = h.orchestrator.target_status("eta").await.unwrap();
    assert_eq!(status.budget.retrains_used, 3);
    assert!(status.budget.is_exhausted());

    let fourth = h.submit("eta", 0.9).await;
    assert!(matches!(fourth, IntakeDecision::Accepted { .. }));
    assert_eq!(h.audit.entries().last().map(|e| e.decision), Some(fourth));
    assert_eq!(h.run_cycles().await, 0);

    let status = h.orchestrator.target_status("eta").await.unwrap();
    assert!(status.pending_request.is_none());
    assert_eq!(status.cycle.state, CycleState::Idle);
    assert_eq!(status.cycle.last_reason, Some(RejectReason::BudgetExhausted));
    let exhausted = h
        .channel
        .notifications()
        .into_iter()
        .find(|n| n.kind == NotificationKind::BudgetExhausted)
        .expect("budget notification");
    assert_eq!(exhausted.reason, Some(RejectReason::BudgetExhausted));
    assert_eq!(h.backend.runner.submitted().len(), 3);

    h.clock.advance(ChronoDuration::days(7));
    assert!(matches!(h.submit("eta", 0.9).await, IntakeDecision::Accepted { .. }));
    assert_eq!(h.run_cycles().await, 1);

    let status = h.orchestrator.target_status("eta").await.unwrap();
    assert_eq!(status.budget.retrains_used, 1);
    assert_eq!(h.backend.runner.submitted().len(), 4);
}

// A store failure for one request leaves it queued without losing the
// outcome of requests handled earlier in the same pass.
#[tokio::test]
async fn test_store_failure_keeps_request_queued_and_others_notified() {
    let h = Harness::new(test_config()).await;
    h.backend.store.fail_writes(true);
    h.orchestrator.promotion().freeze("a", "registry unreachable").await;
    h.backend.store.fail_writes(false);

    h.submit("a", 0.95).await;
    h.submit("b", 0.9).await;

    h.backend.store.fail_reads(true);
    assert_eq!(h.run_cycles().await, 0);
    h.backend.store.fail_reads(false);

    let notifications = h.channel.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].target_id, "a");
    assert_eq!(notifications[0].reason, Some(RejectReason::PromotionFrozen));

    let status = h.orchestrator.target_status("b").await.unwrap();
    assert!(status.pending_request.is_some());
    assert_eq!(status.cycle.state, CycleState::Queued);

    assert_eq!(h.run_cycles().await, 1);
    assert!(h.orchestrator.target_status("b").await.unwrap().pending_request.is_none());
}

#[tokio::test]
async fn test_request_discarded_when_window_rolls_over_while_queued() {
    let h = Harness::new(test_config()).await;

    h.submit("eta", 0.9).await;
    h.clock.advance(ChronoDuration::days(7));
    assert_eq!(h.run_cycles().await, 0);

    let cycle = h.orchestrator.cycle("eta").await.unwrap();
    assert_eq!(cycle.last_reason, Some(RejectReason::WindowRolledOver));
    assert_eq!(h.kinds(), vec![NotificationKind::RequestDiscarded]);
    assert!(h.backend.runner.submitted().is_empty());
}

#[tokio::test]
async fn test_events_during_cooldown_are_dropped() {
    let h = Harness::new(test_config()).await;
    h.with_production("eta", "eta/prod-v1", 0.10);

    h.submit("eta", 0.9).await;
    h.run_cycles().await;

    h.clock.advance(ChronoDuration::seconds(300));
    assert_eq!(h.submit("eta", 0.95).await, IntakeDecision::InCooldown);

    h.clock.advance(ChronoDuration::seconds(301));
    assert!(matches!(h.submit("eta", 0.95).await, IntakeDecision::Accepted { .. }));
}

// The cycle is idle again before the store shows its completion: the
// cooldown still holds.
#[tokio::test]
async fn test_cooldown_holds_before_completion_is_stored() {
    let h = Harness::new(test_config()).await;
    h.with_production("eta", "eta/prod-v1", 0.10);

    h.submit("eta", 0.9).await;
    h.run_cycles().await;
    assert_eq!(h.orchestrator.cycle("eta").await.unwrap().state, CycleState::Idle);

    sqlx::query("UPDATE training_jobs SET cycle_completed_at = NULL")
        .execute(&h.pool)
        .await
        .unwrap();

    h.clock.advance(ChronoDuration::seconds(1));
    assert_eq!(h.submit("eta", 0.95).await, IntakeDecision::InCooldown);
    assert_eq!(h.orchestrator.health().await.queued_requests, 0);

    h.clock.advance(ChronoDuration::seconds(600));
    assert!(matches!(h.submit("eta", 0.95).await, IntakeDecision::Accepted { .. }));
}

#[tokio::test]
async fn test_events_for_in_flight_cycle_are_dropped() {
    let h = Harness::new(test_config()).await;
    h.backend.runner.hold("eta");

    h.submit("eta", 0.9).await;
    assert_eq!(h.orchestrator.dispatch_pending().await, 1);
    assert_eq!(h.submit("eta", 0.99).await, IntakeDecision::InCooldown);
    assert_eq!(h.orchestrator.health().await.queued_requests, 0);

    h.backend.runner.release("eta");
    h.orchestrator.wait_for_cycles().await;
}

#[tokio::test]
async fn test_stale_pending_request_is_superseded() {
    let h = Harness::new(test_config()).await;

    let IntakeDecision::Accepted { request_id: first } = h.submit("eta", 0.8).await else {
        panic!("first event should be accepted");
    };
    h.clock.advance(ChronoDuration::seconds(600));
    let decision = h.submit("eta", 0.75).await;
    let IntakeDecision::Superseded { request_id, replaced } = decision else {
        panic!("expected supersede, got {decision:?}");
    };
    assert_eq!(replaced, first);

    let pending = h.orchestrator.target_status("eta").await.unwrap().pending_request.unwrap();
    assert_eq!(pending.id, request_id);
    assert_eq!(pending.coalesced_count, 2);
    assert!((pending.trigger_severity - 0.8).abs() < f64::EPSILON);
    assert_eq!(h.kinds(), vec![NotificationKind::Superseded]);
}

// Data not ready: the retrain is refunded and the request retried once after
// the backoff.
#[tokio::test]
async fn test_data_not_ready_retries_once_after_backoff() {
    let h = Harness::new(test_config()).await;
    h.with_production("eta", "eta/prod-v1", 0.10);
    h.backend.data.not_ready_for("eta", 1);

    h.submit("eta", 0.9).await;
    assert_eq!(h.run_cycles().await, 1);

    let status = h.orchestrator.target_status("eta").await.unwrap();
    assert_eq!(status.budget.retrains_used, 0);
    assert_eq!(status.cycle.state, CycleState::Queued);
    let pending = status.pending_request.expect("request re-queued");
    assert_eq!(pending.retry_count, 1);
    assert_eq!(status.recent_jobs[0].status, JobStatus::Failed);

    assert_eq!(h.run_cycles().await, 0);
    h.clock.advance(ChronoDuration::seconds(61));
    assert_eq!(h.run_cycles().await, 1);

    assert_eq!(h.backend.registry.production("eta").as_deref(), Some("eta/candidate-1"));
    assert_eq!(h.kinds(), vec![NotificationKind::Rejected, NotificationKind::Promoted]);
    assert_eq!(h.channel.notifications()[0].reason, Some(RejectReason::DataNotReady));
}

#[tokio::test]
async fn test_data_never_ready_discards_request() {
    let h = Harness::new(test_config()).await;
    h.backend.data.not_ready_for("eta", 2);

    h.submit("eta", 0.9).await;
    h.run_cycles().await;
    h.clock.advance(ChronoDuration::seconds(61));
    h.run_cycles().await;

    let status = h.orchestrator.target_status("eta").await.unwrap();
    assert!(status.pending_request.is_none());
    assert_eq!(status.cycle.state, CycleState::Idle);
    assert_eq!(status.budget.retrains_used, 0);
    assert_eq!(
        h.kinds(),
        vec![NotificationKind::Rejected, NotificationKind::RequestDiscarded]
    );
    assert!(h.backend.runner.submitted().is_empty());
}

#[tokio::test]
async fn test_training_failure_keeps_budget_consumed() {
    let h = Harness::new(test_config()).await;
    h.with_production("eta", "eta/prod-v1", 0.10);
    h.backend.runner.fail_jobs("eta", "out of memory");

    h.submit("eta", 0.9).await;
    h.run_cycles().await;

    let status = h.orchestrator.target_status("eta").await.unwrap();
    assert_eq!(status.cycle.last_reason, Some(RejectReason::TrainingFailure));
    assert_eq!(status.budget.retrains_used, 1);
    assert_eq!(status.recent_jobs[0].status, JobStatus::Failed);
    assert_eq!(status.recent_jobs[0].failure_reason.as_deref(), Some("out of memory"));
    assert_eq!(h.backend.registry.production("eta").as_deref(), Some("eta/prod-v1"));
}

#[tokio::test]
async fn test_submission_failure_is_collaborator_error() {
    let h = Harness::new(test_config()).await;
    h.backend.runner.reject_submissions(true);

    h.submit("eta", 0.9).await;
    h.run_cycles().await;

    let status = h.orchestrator.target_status("eta").await.unwrap();
    assert_eq!(status.cycle.last_reason, Some(RejectReason::CollaboratorError));
    assert_eq!(status.recent_jobs[0].status, JobStatus::Failed);
    assert_eq!(h.orchestrator.health().await.available_slots, 2);
}

#[tokio::test]
async fn test_hung_job_times_out() {
    let mut config = test_config();
    config.training.max_training_duration_secs = 1;
    let h = Harness::new(config).await;
    h.backend.runner.hang_jobs("eta");

    h.submit("eta", 0.9).await;
    h.run_cycles().await;

    let status = h.orchestrator.target_status("eta").await.unwrap();
    assert_eq!(status.cycle.last_reason, Some(RejectReason::TimedOut));
    assert_eq!(status.recent_jobs[0].status, JobStatus::TimedOut);
    assert_eq!(status.budget.retrains_used, 1);
}
