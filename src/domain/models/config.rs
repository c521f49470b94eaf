use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::budget::{AnchorDay, BudgetWindowPolicy};

/// Main configuration structure for driftloop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Drift intake thresholds and windows
    #[serde(default)]
    pub intake: IntakeConfig,

    /// Budget and resource admission
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Candidate validation gate
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Training job supervision
    #[serde(default)]
    pub training: TrainingConfig,

    /// Promotion, health watch and rollback
    #[serde(default)]
    pub promotion: PromotionConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Notification sinks
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// External training backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// HTTP ingress
    #[serde(default)]
    pub server: ServerConfig,
}

/// Drift intake configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IntakeConfig {
    /// Events below this severity are ignored
    #[serde(default = "default_severity_threshold")]
    pub severity_threshold: f64,

    /// Events within this many seconds of the previous one coalesce
    #[serde(default = "default_debounce_seconds")]
    pub debounce_seconds: u64,

    /// Minimum seconds between a completed cycle and the next request
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

const fn default_severity_threshold() -> f64 {
    0.7
}

const fn default_debounce_seconds() -> u64 {
    300
}

const fn default_cooldown_seconds() -> u64 {
    600
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            severity_threshold: default_severity_threshold(),
            debounce_seconds: default_debounce_seconds(),
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

/// Admission controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AdmissionConfig {
    /// Retrain cap per target per budget window
    #[serde(default = "default_max_weekend_retrains")]
    pub max_weekend_retrains: u32,

    /// Concurrent training jobs across all targets
    #[serde(default = "default_resource_concurrency_ceiling")]
    pub resource_concurrency_ceiling: usize,

    /// Weekday each budget window starts on (00:00 UTC)
    #[serde(default = "default_window_anchor")]
    pub window_anchor: AnchorDay,

    /// Length of a budget window in days
    #[serde(default = "default_window_length_days")]
    pub window_length_days: u32,

    /// Delay before a request rejected for unready data is retried
    #[serde(default = "default_data_not_ready_backoff_secs")]
    pub data_not_ready_backoff_secs: u64,
}

const fn default_max_weekend_retrains() -> u32 {
    3
}

const fn default_resource_concurrency_ceiling() -> usize {
    2
}

const fn default_window_anchor() -> AnchorDay {
    AnchorDay::Friday
}

const fn default_window_length_days() -> u32 {
    7
}

const fn default_data_not_ready_backoff_secs() -> u64 {
    60
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_weekend_retrains: default_max_weekend_retrains(),
            resource_concurrency_ceiling: default_resource_concurrency_ceiling(),
            window_anchor: default_window_anchor(),
            window_length_days: default_window_length_days(),
            data_not_ready_backoff_secs: default_data_not_ready_backoff_secs(),
        }
    }
}

impl AdmissionConfig {
    pub fn window_policy(&self) -> BudgetWindowPolicy {
        BudgetWindowPolicy {
            anchor: self.window_anchor,
            length_days: self.window_length_days,
        }
    }

    pub fn data_not_ready_backoff(&self) -> Duration {
        Duration::from_secs(self.data_not_ready_backoff_secs)
    }
}

/// Validation gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ValidationConfig {
    /// Minimum relative MAE improvement required to promote
    #[serde(default = "default_improvement_threshold")]
    pub improvement_threshold: f64,

    /// p-value must be strictly below this to promote
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,

    /// Fewer evaluation samples always reject
    #[serde(default = "default_min_eval_samples")]
    pub min_eval_samples: usize,
}

const fn default_improvement_threshold() -> f64 {
    0.05
}

const fn default_significance_level() -> f64 {
    0.05
}

const fn default_min_eval_samples() -> usize {
    30
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            improvement_threshold: default_improvement_threshold(),
            significance_level: default_significance_level(),
            min_eval_samples: default_min_eval_samples(),
        }
    }
}

/// Training job supervision configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrainingConfig {
    /// Jobs running longer are force-failed as timed out
    #[serde(default = "default_max_training_duration_secs")]
    pub max_training_duration_secs: u64,

    /// Interval between job status polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pass the production model as warm-start reference
    #[serde(default = "default_warm_start")]
    pub warm_start: bool,
}

const fn default_max_training_duration_secs() -> u64 {
    3600
}

const fn default_poll_interval_ms() -> u64 {
    5000
}

const fn default_warm_start() -> bool {
    true
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_training_duration_secs: default_max_training_duration_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            warm_start: default_warm_start(),
        }
    }
}

impl TrainingConfig {
    pub fn max_training_duration(&self) -> Duration {
        Duration::from_secs(self.max_training_duration_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Promotion and rollback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PromotionConfig {
    /// How long after promotion the health check is watched
    #[serde(default = "default_rollback_grace_period_secs")]
    pub rollback_grace_period_secs: u64,

    /// Interval between health checks during the grace period
    #[serde(default = "default_health_poll_interval_secs")]
    pub health_poll_interval_secs: u64,

    /// Give up retrying a conflicting promotion after this long
    #[serde(default = "default_conflict_retry_max_elapsed_ms")]
    pub conflict_retry_max_elapsed_ms: u64,
}

const fn default_rollback_grace_period_secs() -> u64 {
    600
}

const fn default_health_poll_interval_secs() -> u64 {
    30
}

const fn default_conflict_retry_max_elapsed_ms() -> u64 {
    30_000
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            rollback_grace_period_secs: default_rollback_grace_period_secs(),
            health_poll_interval_secs: default_health_poll_interval_secs(),
            conflict_retry_max_elapsed_ms: default_conflict_retry_max_elapsed_ms(),
        }
    }
}

impl PromotionConfig {
    pub fn rollback_grace_period(&self) -> Duration {
        Duration::from_secs(self.rollback_grace_period_secs)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_secs(self.health_poll_interval_secs)
    }

    pub fn conflict_retry_max_elapsed(&self) -> Duration {
        Duration::from_millis(self.conflict_retry_max_elapsed_ms)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".driftloop/driftloop.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Append-only JSONL audit log of intake decisions
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_audit_log_path() -> String {
    ".driftloop/audit.jsonl".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            audit_log_path: default_audit_log_path(),
        }
    }
}

/// Notification sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NotificationsConfig {
    /// JSONL file every notification is appended to
    #[serde(default = "default_notification_log_path")]
    pub log_path: String,

    /// Optional webhook receiving each notification as JSON
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
}

fn default_notification_log_path() -> String {
    ".driftloop/notifications.jsonl".to_string()
}

const fn default_webhook_timeout_secs() -> u64 {
    5
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            log_path: default_notification_log_path(),
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

/// External training backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// Per-request timeout
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8700".to_string()
}

const fn default_backend_timeout_secs() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            timeout_secs: default_backend_timeout_secs(),
        }
    }
}

/// HTTP ingress configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8088".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}
