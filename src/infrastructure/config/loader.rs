use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::OrchestratorConfig;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_running: {0}. Must be at least 1")]
    InvalidMaxRunning(usize),

    #[error("Invalid worker pool sizing: min_workers={0}, max_workers={1}")]
    InvalidWorkerSizing(usize, usize),

    #[error("Invalid retry strategy: {0}. Must be one of: fixed, linear, exponential")]
    InvalidRetryStrategy(String),

    #[error("Invalid retry delays: base_delay_ms ({0}) must be <= max_delay_ms ({1})")]
    InvalidRetryDelays(u64, u64),

    #[error("Invalid jitter: {0}. Must be in [0.0, 1.0]")]
    InvalidJitter(f64),

    #[error("Invalid circuit failure_threshold: {0}. Must be in [0.0, 1.0]")]
    InvalidCircuitThreshold(f64),

    #[error("Invalid circuit minimum_requests: {0}. Must be at least 1")]
    InvalidMinimumRequests(u64),

    #[error("Invalid balancer strategy: {0}. Must be one of: round_robin, least_connections, weighted, random")]
    InvalidBalancerStrategy(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .hivemind/config.yaml (project config)
    /// 3. .hivemind/local.yaml (project local overrides, optional)
    /// 4. Environment variables (HIVEMIND_* prefix, highest priority)
    pub fn load() -> Result<OrchestratorConfig> {
        let config: OrchestratorConfig = Figment::new()
            .merge(Serialized::defaults(OrchestratorConfig::default()))
            .merge(Yaml::file(".hivemind/config.yaml"))
            .merge(Yaml::file(".hivemind/local.yaml"))
            .merge(Env::prefixed("HIVEMIND_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<OrchestratorConfig> {
        let config: OrchestratorConfig = Figment::new()
            .merge(Serialized::defaults(OrchestratorConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &OrchestratorConfig) -> Result<(), ConfigError> {
        if config.queue.max_running == 0 {
            return Err(ConfigError::InvalidMaxRunning(config.queue.max_running));
        }

        if config.worker_pool.min_workers == 0
            || config.worker_pool.max_workers < config.worker_pool.min_workers
        {
            return Err(ConfigError::InvalidWorkerSizing(
                config.worker_pool.min_workers,
                config.worker_pool.max_workers,
            ));
        }

        let valid_strategies = ["fixed", "linear", "exponential"];
        if !valid_strategies.contains(&config.retry.strategy.as_str()) {
            return Err(ConfigError::InvalidRetryStrategy(
                config.retry.strategy.clone(),
            ));
        }

        if config.retry.base_delay_ms > config.retry.max_delay_ms {
            return Err(ConfigError::InvalidRetryDelays(
                config.retry.base_delay_ms,
                config.retry.max_delay_ms,
            ));
        }

        if !(0.0..=1.0).contains(&config.retry.jitter) {
            return Err(ConfigError::InvalidJitter(config.retry.jitter));
        }

        if !(0.0..=1.0).contains(&config.circuit.failure_threshold) {
            return Err(ConfigError::InvalidCircuitThreshold(
                config.circuit.failure_threshold,
            ));
        }

        if config.circuit.minimum_requests == 0 {
            return Err(ConfigError::InvalidMinimumRequests(
                config.circuit.minimum_requests,
            ));
        }

        let valid_balancers = ["round_robin", "least_connections", "weighted", "random"];
        if !valid_balancers.contains(&config.load_balancer.strategy.as_str()) {
            return Err(ConfigError::InvalidBalancerStrategy(
                config.load_balancer.strategy.clone(),
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

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{QueueSettings, RetrySettings};

    #[test]
    fn test_defaults_validate() {
        let config = OrchestratorConfig::default();
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_max_running() {
        let config = OrchestratorConfig {
            queue: QueueSettings {
                max_running: 0,
                ..QueueSettings::default()
            },
            ..OrchestratorConfig::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxRunning(0))
        ));
    }

    #[test]
    fn test_invalid_worker_sizing() {
        let mut config = OrchestratorConfig::default();
        config.worker_pool.min_workers = 5;
        config.worker_pool.max_workers = 2;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidWorkerSizing(5, 2))
        ));
    }

    #[test]
    fn test_invalid_retry_strategy() {
        let config = OrchestratorConfig {
            retry: RetrySettings {
                strategy: "fibonacci".to_string(),
                ..RetrySettings::default()
            },
            ..OrchestratorConfig::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidRetryStrategy(_))
        ));
    }

    #[test]
    fn test_invalid_circuit_threshold() {
        let mut config = OrchestratorConfig::default();
        config.circuit.failure_threshold = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidCircuitThreshold(_))
        ));
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = OrchestratorConfig::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));
    }
}
