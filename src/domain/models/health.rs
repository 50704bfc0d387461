//! Health status and per-agent health metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smoothing factor for the response-time moving average.
pub const EMA_ALPHA: f64 = 0.3;

/// Derived health of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// No check has run yet.
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub agent_id: String,
    pub status: HealthStatus,
    pub response_time_ms: f64,
    pub timestamp: DateTime<Utc>,
    /// Probe error or timeout description, when the check did not
    /// complete cleanly.
    pub error: Option<String>,
}

impl HealthCheckResult {
    pub fn new(agent_id: impl Into<String>, status: HealthStatus, response_time_ms: f64) -> Self {
        Self {
            agent_id: agent_id.into(),
            status,
            response_time_ms,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Accumulated health metrics for one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub agent_id: String,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub consecutive_failures: u32,
    /// Exponential moving average of probe latency.
    pub average_response_time_ms: f64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

impl HealthMetrics {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_checks == 0 {
            return 0.0;
        }
        self.successful_checks as f64 / self.total_checks as f64
    }

    pub fn failure_rate(&self) -> f64 {
        1.0 - self.success_rate()
    }

    /// Fold one check result into the running metrics.
    ///
    /// The latency EMA is seeded with the first observation, then
    /// updated as `alpha * observed + (1 - alpha) * ema`.
    pub fn update_from_result(&mut self, result: &HealthCheckResult) {
        self.total_checks += 1;
        self.last_check = Some(result.timestamp);

        if result.is_healthy() {
            self.successful_checks += 1;
            self.consecutive_failures = 0;
            self.last_success = Some(result.timestamp);
        } else {
            self.failed_checks += 1;
            self.consecutive_failures += 1;
            self.last_failure = Some(result.timestamp);
        }

        if self.total_checks == 1 {
            self.average_response_time_ms = result.response_time_ms;
        } else {
            self.average_response_time_ms = EMA_ALPHA * result.response_time_ms
                + (1.0 - EMA_ALPHA) * self.average_response_time_ms;
        }
    }
}
