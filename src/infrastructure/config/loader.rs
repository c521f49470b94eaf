use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Directory holding the project configuration and state.
pub const CONFIG_DIR: &str = ".driftloop";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to extract configuration: {0}")]
    Extract(#[from] Box<figment::Error>),

    #[error("Invalid severity_threshold: {0}. Must be within [0, 1]")]
    InvalidSeverityThreshold(f64),

    #[error("Invalid resource_concurrency_ceiling: {0}. Must be at least 1")]
    InvalidConcurrencyCeiling(usize),

    #[error("Invalid max_weekend_retrains: {0}. Must be at least 1")]
    InvalidRetrainCap(u32),

    #[error("Invalid window_length_days: {0}. Must be at least 1")]
    InvalidWindowLength(u32),

    #[error("Invalid significance_level: {0}. Must be within (0, 1)")]
    InvalidSignificanceLevel(f64),

    #[error("Invalid improvement_threshold: {0}. Must be a non-negative number")]
    InvalidImprovementThreshold(f64),

    #[error("Invalid min_eval_samples: {0}. A paired test needs at least 2")]
    InvalidMinEvalSamples(usize),

    #[error("Invalid max_training_duration_secs: {0}. Must be positive")]
    InvalidTrainingDuration(u64),

    #[error("Invalid poll_interval_ms: {0}. Must be positive")]
    InvalidPollInterval(u64),

    #[error(
        "Invalid health_poll_interval_secs: {interval}. Must be positive and no longer than rollback_grace_period_secs ({grace})"
    )]
    InvalidHealthPollInterval { interval: u64, grace: u64 },

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .driftloop/config.yaml (project config)
    /// 3. .driftloop/local.yaml (local overrides, optional)
    /// 4. Environment variables (`DRIFTLOOP_*`, `__` separates sections)
    pub fn load() -> Result<Config, ConfigError> {
        Self::load_from(Path::new(CONFIG_DIR))
    }

    /// Same as [`Self::load`] with the configuration directory at `dir`.
    pub fn load_from(dir: &Path) -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("DRIFTLOOP_").split("__"))
            .extract()
            .map_err(Box::new)?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a single file, without environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .map_err(Box::new)?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let threshold = config.intake.severity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidSeverityThreshold(threshold));
        }

        let admission = &config.admission;
        if admission.resource_concurrency_ceiling == 0 {
            return Err(ConfigError::InvalidConcurrencyCeiling(
                admission.resource_concurrency_ceiling,
            ));
        }
        if admission.max_weekend_retrains == 0 {
            return Err(ConfigError::InvalidRetrainCap(admission.max_weekend_retrains));
        }
        if admission.window_length_days == 0 {
            return Err(ConfigError::InvalidWindowLength(admission.window_length_days));
        }

        let validation = &config.validation;
        if !(validation.significance_level > 0.0 && validation.significance_level < 1.0) {
            return Err(ConfigError::InvalidSignificanceLevel(
                validation.significance_level,
            ));
        }
        if !validation.improvement_threshold.is_finite() || validation.improvement_threshold < 0.0 {
            return Err(ConfigError::InvalidImprovementThreshold(
                validation.improvement_threshold,
            ));
        }
        if validation.min_eval_samples < 2 {
            return Err(ConfigError::InvalidMinEvalSamples(validation.min_eval_samples));
        }

        if config.training.max_training_duration_secs == 0 {
            return Err(ConfigError::InvalidTrainingDuration(
                config.training.max_training_duration_secs,
            ));
        }
        if config.training.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(config.training.poll_interval_ms));
        }

        // A zero grace period skips the health watch, so the interval is unused.
        let promotion = &config.promotion;
        if promotion.rollback_grace_period_secs > 0
            && (promotion.health_poll_interval_secs == 0
                || promotion.health_poll_interval_secs > promotion.rollback_grace_period_secs)
        {
            return Err(ConfigError::InvalidHealthPollInterval {
                interval: promotion.health_poll_interval_secs,
                grace: promotion.rollback_grace_period_secs,
            });
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.backend.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "backend.base_url cannot be empty".to_string(),
            ));
        }
        if config.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::ValidationFailed(format!(
                "server.bind '{}' is not a socket address",
                config.server.bind
            )));
        }

        Ok(())
    }
}
