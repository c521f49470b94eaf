//! Common test utilities for integration tests
//!
//! Builds an orchestrator over the scripted collaborators, an in-memory
//! database, a manual clock and a recording notification channel.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use driftloop::adapters::mock::{ManualClock, MemoryAuditLog, MockBackend, RecordingChannel};
use driftloop::adapters::sqlite::create_migrated_test_pool;
use driftloop::domain::models::{Config, DriftEvent, IntakeDecision, NotificationKind};
use driftloop::domain::ports::Clock;
use driftloop::services::{NotificationBus, Orchestrator};
use sqlx::SqlitePool;

/// Config tuned for fast tests: short polls and no grace period.
#[allow(dead_code)]
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.training.poll_interval_ms = 10;
    config.training.max_training_duration_secs = 10;
    config.promotion.rollback_grace_period_secs = 0;
    config.promotion.health_poll_interval_secs = 1;
    config.promotion.conflict_retry_max_elapsed_ms = 200;
    config
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub backend: MockBackend,
    pub clock: Arc<ManualClock>,
    pub audit: Arc<MemoryAuditLog>,
    pub channel: Arc<RecordingChannel>,
    pub pool: SqlitePool,
    pub config: Config,
}

#[allow(dead_code)]
impl Harness {
    pub async fn new(config: Config) -> Self {
        let pool = create_migrated_test_pool()
            .await
            .expect("Failed to create test pool");
        let backend = MockBackend::new();
        let clock = Arc::new(ManualClock::default());
        let audit = Arc::new(MemoryAuditLog::default());
        let channel = Arc::new(RecordingChannel::default());

        let orchestrator = build(&config, &backend, &pool, &clock, &audit, &channel);
        Self {
            orchestrator,
            backend,
            clock,
            audit,
            channel,
            pool,
            config,
        }
    }

    /// A fresh orchestrator over the same database and collaborators, as
    /// after a process restart.
    pub fn restart(&self) -> Orchestrator {
        build(
            &self.config,
            &self.backend,
            &self.pool,
            &self.clock,
            &self.audit,
            &self.channel,
        )
    }

    /// Register `artifact_ref` as the production model of `target_id`,
    /// scored at `mae` by the evaluator.
    pub fn with_production(&self, target_id: &str, artifact_ref: &str, mae: f64) {
        self.backend.registry.set_initial_production(target_id, artifact_ref);
        self.backend.evaluator.set_mae(artifact_ref, mae);
    }

    pub fn event(&self, target_id: &str, severity: f64) -> DriftEvent {
        DriftEvent::new(target_id, severity, self.clock.now())
    }

    pub async fn submit(&self, target_id: &str, severity: f64) -> IntakeDecision {
        self.orchestrator
            .submit_event(self.event(target_id, severity))
            .await
            .expect("drift event should be valid")
    }

    /// Dispatch whatever is eligible and wait for the started cycles to end.
    pub async fn run_cycles(&self) -> usize {
        let started = self.orchestrator.dispatch_pending().await;
        self.orchestrator.wait_for_cycles().await;
        started
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.channel.kinds()
    }
}

fn build(
    config: &Config,
    backend: &MockBackend,
    pool: &SqlitePool,
    clock: &Arc<ManualClock>,
    audit: &Arc<MemoryAuditLog>,
    channel: &Arc<RecordingChannel>,
) -> Orchestrator {
    let ports = backend.ports(pool.clone(), audit.clone(), clock.clone());
    let bus = NotificationBus::default().with_channel(channel.clone());
    Orchestrator::new(config.clone(), ports, Arc::new(bus))
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
#[allow(dead_code)]
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Poll `predicate` every 10ms until it holds or `timeout` passes.
#[allow(dead_code)]
pub async fn eventually<F, Fut>(mut predicate: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
