use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::models::LoggingConfig;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Console output format (json, pretty)
    #[serde(default = "default_format")]
    pub format: LogFormat,

    /// Directory for rolling log files (optional, console only when None)
    pub log_dir: Option<PathBuf>,

    /// Enable console logging (stderr, so command output on stdout stays clean)
    #[serde(default = "default_true")]
    pub enable_console: bool,

    /// Log file rotation policy
    #[serde(default)]
    pub rotation: RotationPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            log_dir: None,
            enable_console: true,
            rotation: RotationPolicy::default(),
        }
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            level: config.level.clone(),
            format: if config.format.eq_ignore_ascii_case("pretty") {
                LogFormat::Pretty
            } else {
                LogFormat::Json
            },
            log_dir: config.log_dir.as_ref().map(PathBuf::from),
            enable_console: true,
            rotation: RotationPolicy::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_format() -> LogFormat {
    LogFormat::Json
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_logging_config() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
            log_dir: Some("/var/log/driftloop".to_string()),
            audit_log_path: "audit.jsonl".to_string(),
        };

        let log = LogConfig::from(&config);
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, LogFormat::Pretty);
        assert_eq!(log.log_dir, Some(PathBuf::from("/var/log/driftloop")));
        assert_eq!(log.rotation, RotationPolicy::Daily);
    }
}
