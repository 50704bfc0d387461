//! Declarative configuration for the orchestration core.
//!
//! These structs are what the figment loader deserializes from
//! `.hivemind/config.yaml` and `HIVEMIND_*` environment variables. Each
//! service owns a richer runtime config type; `From` conversions live in
//! the service modules.

use serde::{Deserialize, Serialize};

/// Top-level configuration for every core component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub queue: QueueSettings,
    pub retry: RetrySettings,
    pub worker_pool: WorkerPoolSettings,
    pub registry: RegistrySettings,
    pub health: HealthSettings,
    pub load_balancer: BalancerSettings,
    pub circuit: CircuitSettings,
    pub logging: LoggingSettings,
}

/// Task queue limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Maximum queued-plus-tracked tasks; `None` means unbounded.
    pub max_capacity: Option<usize>,
    /// Maximum tasks in the running state at once.
    pub max_running: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_capacity: None,
            max_running: 10,
        }
    }
}

/// Retry policy defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    /// One of: fixed, linear, exponential.
    pub strategy: String,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    /// Multiplicative jitter factor in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: "exponential".to_string(),
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
            jitter: 0.1,
        }
    }
}

/// Worker pool sizing and deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolSettings {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Pool-wide per-task deadline in seconds; `None` disables it.
    pub max_execution_time_seconds: Option<f64>,
    /// Idle time after an unexpected worker error before resuming.
    pub error_cooldown_ms: u64,
    /// Grace given to in-flight handlers during shutdown.
    pub drain_timeout_seconds: f64,
}

impl Default for WorkerPoolSettings {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 10,
            max_execution_time_seconds: None,
            error_cooldown_ms: 1000,
            drain_timeout_seconds: 5.0,
        }
    }
}

/// Service registry sweep cadence and default TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub cleanup_interval_seconds: u64,
    pub default_ttl_seconds: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: 30,
            default_ttl_seconds: 60,
        }
    }
}

/// Health monitor cadence and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub check_interval_seconds: u64,
    /// Consecutive failures before an agent is reported unhealthy.
    pub failure_threshold: u32,
    pub response_timeout_seconds: f64,
    pub degraded_threshold_ms: f64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval_seconds: 30,
            failure_threshold: 3,
            response_timeout_seconds: 5.0,
            degraded_threshold_ms: 1000.0,
        }
    }
}

/// Load balancer strategy selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerSettings {
    /// One of: round_robin, least_connections, weighted, random.
    pub strategy: String,
    pub default_weight: u32,
}

impl Default for BalancerSettings {
    fn default() -> Self {
        Self {
            strategy: "round_robin".to_string(),
            default_weight: 1,
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitSettings {
    /// Failure rate in `[0, 1]` that trips the circuit.
    pub failure_threshold: f64,
    /// Consecutive half-open successes required to close.
    pub success_threshold: u32,
    /// Seconds an open circuit waits before probing recovery.
    pub timeout_seconds: f64,
    /// Requests observed before the failure rate is evaluated.
    pub minimum_requests: u64,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            success_threshold: 2,
            timeout_seconds: 60.0,
            minimum_requests: 5,
        }
    }
}

/// Logging output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// One of: trace, debug, info, warn, error.
    pub level: String,
    /// One of: json, pretty.
    pub format: String,
    /// Directory for rolling log files; `None` logs to stdout only.
    pub log_dir: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
        }
    }
}
