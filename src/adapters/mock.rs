//! Scripted in-process collaborators for tests and local dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AuditEntry, EvaluationReport, JobStatus, ModelMetrics, Notification, NotificationKind,
    SampleError, StabilityRecord,
};
use crate::domain::ports::{
    AuditLog, Clock, DataReadiness, DataSnapshot, HealthCheck, JobReport, JobRunner, JobSpec,
    ModelEvaluator, ModelRegistry, NotificationChannel, StabilityRepository,
};
use crate::adapters::sqlite::{
    SqliteBudgetRepository, SqliteJobRepository, SqliteStabilityRepository,
};
use crate::services::OrchestratorPorts;
use sqlx::SqlitePool;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *lock(&self.now) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Default for ManualClock {
    /// Saturday 2026-03-07 14:00 UTC, inside a Friday-anchored window.
    fn default() -> Self {
        Self::new(Utc.with_ymd_and_hms(2026, 3, 7, 14, 0, 0).single().unwrap_or_default())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// Data readiness that is ready unless told otherwise.
#[derive(Debug, Default)]
pub struct MockDataReadiness {
    not_ready_answers: Mutex<HashMap<String, u32>>,
    checks: AtomicU64,
}

impl MockDataReadiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer "not ready" for the next `times` checks of `target_id`.
    pub fn not_ready_for(&self, target_id: &str, times: u32) {
        lock(&self.not_ready_answers).insert(target_id.to_string(), times);
    }

    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataReadiness for MockDataReadiness {
    async fn is_ready(&self, target_id: &str) -> DomainResult<DataSnapshot> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let mut answers = lock(&self.not_ready_answers);
        if let Some(remaining) = answers.get_mut(target_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(DataSnapshot::not_ready());
            }
        }
        Ok(DataSnapshot::ready(format!("snapshots/{target_id}/latest")))
    }
}

#[derive(Debug, Clone)]
struct MockJob {
    target_id: String,
    artifact_ref: String,
    finished: bool,
}

/// Job runner whose jobs succeed on the first poll unless held or failed.
///
/// Artifacts are named `{target}/candidate-{n}` with `n` counting per target
/// from 1.
#[derive(Debug, Default)]
pub struct MockJobRunner {
    jobs: Mutex<HashMap<String, MockJob>>,
    submitted: Mutex<Vec<JobSpec>>,
    held: Mutex<HashSet<String>>,
    failing: Mutex<HashMap<String, String>>,
    hanging: Mutex<HashSet<String>>,
    reject_submit: AtomicBool,
    per_target_seq: Mutex<HashMap<String, u64>>,
    active: Mutex<HashMap<String, usize>>,
    max_active_total: Mutex<usize>,
    max_active_per_target: Mutex<usize>,
}

impl MockJobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep jobs of `target_id` running until [`Self::release`].
    pub fn hold(&self, target_id: &str) {
        lock(&self.held).insert(target_id.to_string());
    }

    pub fn release(&self, target_id: &str) {
        lock(&self.held).remove(target_id);
    }

    /// Jobs of `target_id` fail with `message`.
    pub fn fail_jobs(&self, target_id: &str, message: &str) {
        lock(&self.failing).insert(target_id.to_string(), message.to_string());
    }

    /// Jobs of `target_id` never finish.
    pub fn hang_jobs(&self, target_id: &str) {
        lock(&self.hanging).insert(target_id.to_string());
    }

    pub fn reject_submissions(&self, reject: bool) {
        self.reject_submit.store(reject, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<JobSpec> {
        lock(&self.submitted).clone()
    }

    /// Jobs submitted and not yet reported finished.
    pub fn running(&self) -> usize {
        lock(&self.active).values().sum()
    }

    pub fn max_concurrent(&self) -> usize {
        *lock(&self.max_active_total)
    }

    pub fn max_concurrent_per_target(&self) -> usize {
        *lock(&self.max_active_per_target)
    }

    fn finish(&self, target_id: &str) {
        let mut active = lock(&self.active);
        if let Some(count) = active.get_mut(target_id) {
            *count = count.saturating_sub(1);
        }
    }
}

#[async_trait]
impl JobRunner for MockJobRunner {
    async fn submit(&self, spec: &JobSpec) -> DomainResult<String> {
        if self.reject_submit.load(Ordering::SeqCst) {
            return Err(DomainError::collaborator("job_runner", "submission rejected"));
        }

        let seq = {
            let mut seqs = lock(&self.per_target_seq);
            let seq = seqs.entry(spec.target_id.clone()).or_insert(0);
            *seq += 1;
            *seq
        };
        let external_id = format!("mock-{}", spec.job_id);
        lock(&self.jobs).insert(
            external_id.clone(),
            MockJob {
                target_id: spec.target_id.clone(),
                artifact_ref: format!("{}/candidate-{seq}", spec.target_id),
                finished: false,
            },
        );
        lock(&self.submitted).push(spec.clone());

        {
            let mut active = lock(&self.active);
            let count = active.entry(spec.target_id.clone()).or_insert(0);
            *count += 1;
            let per_target = *count;
            let total: usize = active.values().sum();
            drop(active);

            let mut max_total = lock(&self.max_active_total);
            *max_total = (*max_total).max(total);
            let mut max_target = lock(&self.max_active_per_target);
            *max_target = (*max_target).max(per_target);
        }

        Ok(external_id)
    }

    async fn poll(&self, external_id: &str) -> DomainResult<JobReport> {
        let job = lock(&self.jobs)
            .get(external_id)
            .cloned()
            .ok_or_else(|| DomainError::collaborator("job_runner", format!("unknown job {external_id}")))?;

        if job.finished {
            return Err(DomainError::collaborator("job_runner", "job already reported"));
        }
        if lock(&self.held).contains(&job.target_id) || lock(&self.hanging).contains(&job.target_id) {
            return Ok(JobReport::running());
        }

        if let Some(entry) = lock(&self.jobs).get_mut(external_id) {
            entry.finished = true;
        }
        self.finish(&job.target_id);

        let failure = lock(&self.failing).get(&job.target_id).cloned();
        Ok(match failure {
            Some(message) => JobReport::failed(message),
            None => JobReport::succeeded(
                job.artifact_ref,
                ModelMetrics {
                    mae: 0.09,
                    rmse: 0.11,
                    n_samples: 40,
                },
            ),
        })
    }
}

/// In-memory registry with a production stage per target.
#[derive(Debug, Default)]
pub struct MockRegistry {
    production: Mutex<HashMap<String, String>>,
    registered: Mutex<Vec<String>>,
    fail_set: AtomicBool,
    /// Stage transitions still allowed before every further one fails.
    fail_after: Mutex<Option<u32>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_initial_production(&self, target_id: &str, artifact_ref: &str) {
        lock(&self.production).insert(target_id.to_string(), artifact_ref.to_string());
    }

    pub fn production(&self, target_id: &str) -> Option<String> {
        lock(&self.production).get(target_id).cloned()
    }

    /// Make every `set_production` call fail.
    pub fn fail_set_production(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::SeqCst);
    }

    /// Let `allowed` more `set_production` calls succeed, then fail the rest.
    pub fn fail_set_production_after(&self, allowed: u32) {
        *lock(&self.fail_after) = Some(allowed);
    }

    /// Version labels of registered candidates, in registration order.
    pub fn registered_versions(&self) -> Vec<String> {
        lock(&self.registered).clone()
    }
}

#[async_trait]
impl ModelRegistry for MockRegistry {
    async fn get_production(&self, target_id: &str) -> DomainResult<Option<String>> {
        Ok(self.production(target_id))
    }

    async fn register(
        &self,
        _target_id: &str,
        artifact_ref: &str,
        _metrics: &ModelMetrics,
        version_label: &str,
    ) -> DomainResult<String> {
        lock(&self.registered).push(version_label.to_string());
        Ok(format!("cand-{artifact_ref}"))
    }

    async fn set_production(&self, target_id: &str, artifact_ref: &str) -> DomainResult<()> {
        let exhausted = match &mut *lock(&self.fail_after) {
            Some(0) => true,
            Some(allowed) => {
                *allowed -= 1;
                false
            }
            None => false,
        };
        if exhausted || self.fail_set.load(Ordering::SeqCst) {
            return Err(DomainError::collaborator("model_registry", "stage transition unavailable"));
        }
        self.set_initial_production(target_id, artifact_ref);
        Ok(())
    }
}

/// Evaluator that scores artifacts with a configured MAE.
///
/// Every artifact is scored on the same `sample_count` sample ids, so
/// baseline and candidate reports always pair up.
#[derive(Debug)]
pub struct MockEvaluator {
    mae_by_artifact: Mutex<HashMap<String, f64>>,
    fallback_mae: Mutex<f64>,
    sample_count: Mutex<usize>,
}

impl Default for MockEvaluator {
    fn default() -> Self {
        Self {
            mae_by_artifact: Mutex::new(HashMap::new()),
            fallback_mae: Mutex::new(0.09),
            sample_count: Mutex::new(40),
        }
    }
}

impl MockEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mae(&self, artifact_ref: &str, mae: f64) {
        lock(&self.mae_by_artifact).insert(artifact_ref.to_string(), mae);
    }

    /// MAE of artifacts without an explicit score (newly trained candidates).
    pub fn set_fallback_mae(&self, mae: f64) {
        *lock(&self.fallback_mae) = mae;
    }

    pub fn set_sample_count(&self, n: usize) {
        *lock(&self.sample_count) = n;
    }
}

/// A report whose absolute errors alternate around `mae` by `spread`.
pub fn synthetic_report(artifact_ref: &str, mae: f64, spread: f64, n: usize) -> EvaluationReport {
    let samples = (0..n)
        .map(|i| SampleError {
            sample_id: format!("sample-{i}"),
            error: if i % 2 == 0 { mae + spread } else { -(mae - spread) },
        })
        .collect();
    EvaluationReport::from_residuals(artifact_ref, samples)
}

#[async_trait]
impl ModelEvaluator for MockEvaluator {
    async fn evaluate(
        &self,
        _target_id: &str,
        artifact_ref: &str,
        _dataset_ref: &str,
    ) -> DomainResult<EvaluationReport> {
        let mae = lock(&self.mae_by_artifact)
            .get(artifact_ref)
            .copied()
            .unwrap_or_else(|| *lock(&self.fallback_mae));
        let n = *lock(&self.sample_count);
        Ok(synthetic_report(artifact_ref, mae, 0.01, n))
    }
}

/// Health check that is healthy unless told otherwise.
#[derive(Debug, Default)]
pub struct MockHealthCheck {
    unhealthy: Mutex<HashSet<String>>,
    checks: AtomicU64,
}

impl MockHealthCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_healthy(&self, target_id: &str, healthy: bool) {
        let mut unhealthy = lock(&self.unhealthy);
        if healthy {
            unhealthy.remove(target_id);
        } else {
            unhealthy.insert(target_id.to_string());
        }
    }

    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheck for MockHealthCheck {
    async fn check(&self, target_id: &str) -> DomainResult<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(!lock(&self.unhealthy).contains(target_id))
    }
}

/// Audit log kept in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn entries(&self) -> Vec<AuditEntry> {
        lock(&self.entries).clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, entry: &AuditEntry) -> DomainResult<()> {
        lock(&self.entries).push(entry.clone());
        Ok(())
    }
}

/// Notification channel that records what it is sent.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    received: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingChannel {
    pub fn failing() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.received).clone()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        lock(&self.received).iter().map(|n| n.kind).collect()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, notification: &Notification) -> DomainResult<()> {
        if self.fail {
            return Err(DomainError::collaborator("notification", "channel unavailable"));
        }
        lock(&self.received).push(notification.clone());
        Ok(())
    }
}

/// Switches that make [`FaultyStabilityRepository`] fail.
#[derive(Debug, Default)]
pub struct StoreFaults {
    reads: AtomicBool,
    writes: AtomicBool,
}

impl StoreFaults {
    pub fn fail_reads(&self, fail: bool) {
        self.reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self, flag: &AtomicBool, operation: &str) -> DomainResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(DomainError::collaborator("stability_store", format!("{operation} unavailable")));
        }
        Ok(())
    }
}

/// Sqlite stability repository whose reads and writes can be switched off.
pub struct FaultyStabilityRepository {
    inner: SqliteStabilityRepository,
    faults: Arc<StoreFaults>,
}

impl FaultyStabilityRepository {
    pub fn new(inner: SqliteStabilityRepository, faults: Arc<StoreFaults>) -> Self {
        Self { inner, faults }
    }
}

#[async_trait]
impl StabilityRepository for FaultyStabilityRepository {
    async fn get(&self, target_id: &str) -> DomainResult<Option<StabilityRecord>> {
        self.faults.check(&self.faults.reads, "read")?;
        self.inner.get(target_id).await
    }

    async fn create_if_absent(&self, record: &StabilityRecord) -> DomainResult<bool> {
        self.faults.check(&self.faults.writes, "write")?;
        self.inner.create_if_absent(record).await
    }

    async fn compare_and_swap(&self, expected_current: &str, record: &StabilityRecord) -> DomainResult<()> {
        self.faults.check(&self.faults.writes, "write")?;
        self.inner.compare_and_swap(expected_current, record).await
    }

    async fn set_frozen(&self, target_id: &str, reason: Option<&str>) -> DomainResult<()> {
        self.faults.check(&self.faults.writes, "write")?;
        self.inner.set_frozen(target_id, reason).await
    }

    async fn list(&self) -> DomainResult<Vec<StabilityRecord>> {
        self.faults.check(&self.faults.reads, "read")?;
        self.inner.list().await
    }
}

/// One of each scripted collaborator, shared so tests can steer them while
/// the orchestrator holds the same instances.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    pub data: Arc<MockDataReadiness>,
    pub runner: Arc<MockJobRunner>,
    pub registry: Arc<MockRegistry>,
    pub evaluator: Arc<MockEvaluator>,
    pub health: Arc<MockHealthCheck>,
    pub store: Arc<StoreFaults>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orchestrator ports backed by these mocks and sqlite repositories.
    pub fn ports(
        &self,
        pool: SqlitePool,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> OrchestratorPorts {
        OrchestratorPorts {
            stability: Arc::new(FaultyStabilityRepository::new(
                SqliteStabilityRepository::new(pool.clone()),
                self.store.clone(),
            )),
            budgets: Arc::new(SqliteBudgetRepository::new(pool.clone())),
            jobs: Arc::new(SqliteJobRepository::new(pool)),
            data: self.data.clone(),
            runner: self.runner.clone(),
            registry: self.registry.clone(),
            evaluator: self.evaluator.clone(),
            health: self.health.clone(),
            audit,
            clock,
        }
    }
}
