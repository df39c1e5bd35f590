use anyhow::{Context, Result};
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::LoggingConfig;

const LOG_FILE_NAME: &str = "iterctl.log";

/// Logger implementation using tracing
pub struct LoggerImpl {
    _guard: Option<WorkerGuard>,
}

impl LoggerImpl {
    /// Install the global subscriber described by `config`.
    ///
    /// Stdout output follows `config.format`. When `log_dir` is set, a rolling JSON file
    /// is written as well; the returned value owns its background writer and must be
    /// kept alive for as long as logs should be flushed.
    ///
    /// # Errors
    /// Returns an error for an unknown level, format or rotation, or when a global
    /// subscriber is already installed.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let default_level = parse_log_level(&config.level)?;
        let pretty = match config.format.to_lowercase().as_str() {
            "json" => false,
            "pretty" => true,
            other => anyhow::bail!("Invalid log format: {other}"),
        };

        let env_filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy();

        let stdout_layer = if pretty {
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(io::stdout)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(env_filter.clone())
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stdout)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(env_filter.clone())
                .boxed()
        };

        let (file_layer, guard) = match config.log_dir {
            Some(ref log_dir) => {
                let appender = match config.rotation.to_lowercase().as_str() {
                    "daily" => rolling::daily(log_dir, LOG_FILE_NAME),
                    "hourly" => rolling::hourly(log_dir, LOG_FILE_NAME),
                    "never" => rolling::never(log_dir, LOG_FILE_NAME),
                    other => anyhow::bail!("Invalid log rotation: {other}"),
                };
                let (writer, guard) = tracing_appender::non_blocking(appender);

                // Files are always JSON.
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_filter(env_filter)
                    .boxed();
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
            .context("a global tracing subscriber is already installed")?;

        tracing::info!(
            level = %config.level,
            format = %config.format,
            file_output = config.log_dir.is_some(),
            "logger initialized"
        );

        Ok(Self { _guard: guard })
    }

    pub fn has_file_output(&self) -> bool {
        self._guard.is_some()
    }
}

/// Parse log level string to Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {level}"),
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
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_logger_rejects_unknown_format() {
        let config = LoggingConfig {
            format: "xml".to_string(),
            ..LoggingConfig::default()
        };
        assert!(LoggerImpl::init(&config).is_err());
    }

    // Only one test may install the global subscriber.
    #[test]
    fn test_logger_init_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
            log_dir: Some(dir.path().to_path_buf()),
            rotation: "never".to_string(),
        };

        let logger = LoggerImpl::init(&config).unwrap();
        assert!(logger.has_file_output());
    }
}
