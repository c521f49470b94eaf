use super::config::{LogConfig, LogFormat, RotationPolicy};
use std::io;
use thiserror::Error;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry};

const LOG_FILE_NAME: &str = "driftloop.log";

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Failed to install tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logger implementation using tracing
pub struct LoggerImpl {
    _guard: Option<WorkerGuard>,
}

impl LoggerImpl {
    /// Initialize the global subscriber.
    ///
    /// Console output goes to stderr in the configured format. When
    /// `log_dir` is set, JSON lines are also written to a rolling file
    /// through a non-blocking writer whose guard lives in the returned
    /// value; drop it only at process exit.
    pub fn init(config: &LogConfig) -> Result<Self, LoggerError> {
        let default_level = parse_log_level(&config.level)?;

        let env_filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy();

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        if let Some(ref log_dir) = config.log_dir {
            let file_appender = match config.rotation {
                RotationPolicy::Daily => rolling::daily(log_dir, LOG_FILE_NAME),
                RotationPolicy::Hourly => rolling::hourly(log_dir, LOG_FILE_NAME),
                RotationPolicy::Never => rolling::never(log_dir, LOG_FILE_NAME),
            };
            let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
            guard = Some(file_guard);

            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking_file)
                    .with_ansi(false)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .boxed(),
            );
        }

        if config.enable_console {
            let console: BoxedLayer = match config.format {
                LogFormat::Json => tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .boxed(),
                LogFormat::Pretty => tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .boxed(),
            };
            layers.push(console);
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(env_filter)
            .try_init()?;

        tracing::info!(
            level = %config.level,
            format = ?config.format,
            file_output = config.log_dir.is_some(),
            "logger initialized"
        );

        Ok(Self { _guard: guard })
    }
}

/// Parse log level string to Level
fn parse_log_level(level: &str) -> Result<Level, LoggerError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(LoggerError::InvalidLevel(level.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("error"), Ok(Level::ERROR)));
        assert!(matches!(parse_log_level("TRACE"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("verbose"), Err(LoggerError::InvalidLevel(_))));
    }

    #[test]
    fn test_invalid_level_fails_before_installing() {
        let config = LogConfig {
            level: "loud".to_string(),
            ..LogConfig::default()
        };
        assert!(LoggerImpl::init(&config).is_err());
    }

    // Installing the global subscriber is left to the binary; a second
    // install in the same test process would fail with `Init`.
}
