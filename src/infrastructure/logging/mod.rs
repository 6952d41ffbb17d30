//! Logging initialization using tracing.
//!
//! Stdout in json or pretty format, optionally a daily-rolling JSON
//! file, both behind an env-filter. The returned guard must be kept
//! alive for the life of the process so the non-blocking file writer
//! flushes.

use anyhow::{anyhow, Result};
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::config::{LogConfig, LogFormat};

/// Initialized logging pipeline. Hold on to this for process lifetime.
pub struct LoggingGuard {
    _guard: Option<WorkerGuard>,
}

/// Initialize the global tracing subscriber from configuration.
pub fn init(config: &LogConfig) -> Result<LoggingGuard> {
    let default_level = parse_log_level(&config.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let guard = if let Some(log_dir) = &config.log_dir {
        let file_appender = rolling::daily(log_dir, "vigil.log");
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

        // File layer is always JSON for structured ingestion.
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true)
            .with_filter(env_filter);

        if config.enable_stdout {
            let stdout_filter = EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy();
            match config.format {
                LogFormat::Json => {
                    let stdout_layer = tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(io::stdout)
                        .with_target(true)
                        .with_filter(stdout_filter);
                    tracing_subscriber::registry()
                        .with(file_layer)
                        .with(stdout_layer)
                        .init();
                }
                LogFormat::Pretty => {
                    let stdout_layer = tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(io::stdout)
                        .with_target(true)
                        .with_filter(stdout_filter);
                    tracing_subscriber::registry()
                        .with(file_layer)
                        .with(stdout_layer)
                        .init();
                }
            }
        } else {
            tracing_subscriber::registry().with(file_layer).init();
        }
        Some(guard)
    } else {
        match config.format {
            LogFormat::Json => {
                let stdout_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stdout)
                    .with_target(true)
                    .with_filter(env_filter);
                tracing_subscriber::registry().with(stdout_layer).init();
            }
            LogFormat::Pretty => {
                let stdout_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(io::stdout)
                    .with_target(true)
                    .with_filter(env_filter);
                tracing_subscriber::registry().with(stdout_layer).init();
            }
        }
        None
    };

    Ok(LoggingGuard { _guard: guard })
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(anyhow!("invalid log level: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(parse_log_level("loud").is_err());
    }
}
