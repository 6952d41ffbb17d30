use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::VigilConfig;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid dispatcher_workers: {0}. Must be between 1 and 64")]
    InvalidDispatcherWorkers(usize),

    #[error("Invalid executor_workers: {0}. Must be between 1 and 16")]
    InvalidExecutorWorkers(usize),

    #[error("Invalid engine_partitions: {0}. Must be between 1 and 64")]
    InvalidEnginePartitions(usize),

    #[error("Invalid ingress_queue_capacity: {0}. Must be at least 1")]
    InvalidIngressCapacity(usize),

    #[error(
        "Invalid constitutional_channel_partition_fraction: {0}. Must be within 0.0..=1.0"
    )]
    InvalidPartitionFraction(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid retention: constitutional_retention_days ({0}) must be at least alert_retention_days ({1})")]
    InvalidRetention(u32, u32),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .vigil/config.yaml (project config)
    /// 3. .vigil/local.yaml (local overrides, optional)
    /// 4. Environment variables (VIGIL_* prefix, highest priority)
    pub fn load() -> Result<VigilConfig> {
        let config: VigilConfig = Figment::new()
            .merge(Serialized::defaults(VigilConfig::default()))
            .merge(Yaml::file(".vigil/config.yaml"))
            .merge(Yaml::file(".vigil/local.yaml"))
            .merge(Env::prefixed("VIGIL_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<VigilConfig> {
        let config: VigilConfig = Figment::new()
            .merge(Serialized::defaults(VigilConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("VIGIL_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &VigilConfig) -> Result<(), ConfigError> {
        if config.dispatcher_workers == 0 || config.dispatcher_workers > 64 {
            return Err(ConfigError::InvalidDispatcherWorkers(
                config.dispatcher_workers,
            ));
        }
        if config.executor_workers == 0 || config.executor_workers > 16 {
            return Err(ConfigError::InvalidExecutorWorkers(config.executor_workers));
        }
        if config.engine_partitions == 0 || config.engine_partitions > 64 {
            return Err(ConfigError::InvalidEnginePartitions(
                config.engine_partitions,
            ));
        }
        if config.ingress_queue_capacity == 0 {
            return Err(ConfigError::InvalidIngressCapacity(
                config.ingress_queue_capacity,
            ));
        }

        let fraction = config.constitutional_channel_partition_fraction;
        if !(0.0..=1.0).contains(&fraction) || fraction.is_nan() {
            return Err(ConfigError::InvalidPartitionFraction(fraction));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.store.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.constitutional_retention_days < config.alert_retention_days {
            return Err(ConfigError::InvalidRetention(
                config.constitutional_retention_days,
                config.alert_retention_days,
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = VigilConfig::default();
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_worker_counts_rejected() {
        let mut config = VigilConfig::default();
        config.dispatcher_workers = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidDispatcherWorkers(0))
        ));

        let mut config = VigilConfig::default();
        config.executor_workers = 99;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidExecutorWorkers(99))
        ));
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        let mut config = VigilConfig::default();
        config.constitutional_channel_partition_fraction = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidPartitionFraction(_))
        ));
    }

    #[test]
    fn test_backoff_bounds_rejected() {
        let mut config = VigilConfig::default();
        config.retry.initial_backoff_ms = 10_000;
        config.retry.max_backoff_ms = 1_000;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(_, _))
        ));
    }

    #[test]
    fn test_constitutional_retention_must_dominate() {
        let mut config = VigilConfig::default();
        config.constitutional_retention_days = 7;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidRetention(7, 30))
        ));
    }
}
