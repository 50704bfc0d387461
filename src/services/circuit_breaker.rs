//! Per-agent circuit breakers for failure isolation.
//!
//! Each callee agent gets its own circuit. A closed circuit trips open
//! once the observed failure rate crosses the threshold (after a minimum
//! request count), blocks calls while open, probes recovery through a
//! half-open state after the timeout, and closes again on enough
//! consecutive successes.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::models::CircuitSettings;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests flow through.
    Closed,
    /// Circuit tripped, requests blocked.
    Open,
    /// Testing recovery, requests allowed.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Invalid circuit configuration.
#[derive(Debug, Error)]
pub enum CircuitConfigError {
    #[error("failure_threshold must be in [0.0, 1.0], got {0}")]
    InvalidFailureThreshold(f64),

    #[error("success_threshold must be at least 1")]
    InvalidSuccessThreshold,

    #[error("timeout must be positive")]
    InvalidTimeout,

    #[error("minimum_requests must be at least 1")]
    InvalidMinimumRequests,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure rate in `[0, 1]` that trips a closed circuit.
    pub failure_threshold: f64,
    /// Consecutive half-open successes required to close.
    pub success_threshold: u32,
    /// How long an open circuit waits before probing recovery.
    pub timeout: Duration,
    /// Requests observed before the failure rate is evaluated.
    pub minimum_requests: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            minimum_requests: 5,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), CircuitConfigError> {
        if !(0.0..=1.0).contains(&self.failure_threshold) {
            return Err(CircuitConfigError::InvalidFailureThreshold(
                self.failure_threshold,
            ));
        }
        if self.success_threshold < 1 {
            return Err(CircuitConfigError::InvalidSuccessThreshold);
        }
        if self.timeout.is_zero() {
            return Err(CircuitConfigError::InvalidTimeout);
        }
        if self.minimum_requests < 1 {
            return Err(CircuitConfigError::InvalidMinimumRequests);
        }
        Ok(())
    }
}

impl TryFrom<&CircuitSettings> for CircuitBreakerConfig {
    type Error = CircuitConfigError;

    fn try_from(settings: &CircuitSettings) -> Result<Self, Self::Error> {
        let config = Self {
            failure_threshold: settings.failure_threshold,
            success_threshold: settings.success_threshold,
            timeout: Duration::from_secs_f64(settings.timeout_seconds),
            minimum_requests: settings.minimum_requests,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Metrics for one agent's circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitMetrics {
    pub agent_id: String,
    pub state: CircuitState,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
    /// Times the circuit transitioned closed/half-open to open.
    pub trip_count: u32,
}

impl CircuitMetrics {
    fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            state: CircuitState::Closed,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            consecutive_successes: 0,
            consecutive_failures: 0,
            last_failure_at: None,
            last_success_at: None,
            state_changed_at: Utc::now(),
            trip_count: 0,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failed_requests as f64 / self.total_requests as f64
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }

    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.state_changed_at = Utc::now();
    }

    fn open(&mut self) {
        self.transition(CircuitState::Open);
        self.trip_count += 1;
    }

    fn half_open(&mut self) {
        self.transition(CircuitState::HalfOpen);
        self.consecutive_successes = 0;
        self.consecutive_failures = 0;
    }

    fn close(&mut self) {
        self.transition(CircuitState::Closed);
        self.consecutive_successes = 0;
        self.consecutive_failures = 0;
    }
}

/// Error from a circuit-protected operation.
#[derive(Debug)]
pub enum CircuitError<E> {
    /// The circuit is open and blocking requests.
    Open {
        agent_id: String,
        /// Earliest time the circuit will probe recovery.
        retry_after: DateTime<Utc>,
    },
    /// The underlying operation failed (and was recorded).
    Operation(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open {
                agent_id,
                retry_after,
            } => write!(
                f,
                "Circuit breaker is open for agent {agent_id}, retry after {retry_after}"
            ),
            Self::Operation(e) => write!(f, "Operation failed: {e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { .. } => None,
            Self::Operation(e) => Some(e),
        }
    }
}

/// Per-agent circuit breaker table.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: RwLock<HashMap<String, CircuitMetrics>>,
}

impl CircuitBreaker {
    /// Create a breaker, validating configuration invariants.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, CircuitConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            circuits: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
            circuits: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state for an agent, performing the lazy open-to-half-open
    /// transition when the timeout has elapsed.
    pub async fn get_state(&self, agent_id: &str) -> CircuitState {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(agent_id.to_string())
            .or_insert_with(|| CircuitMetrics::new(agent_id));
        self.advance_if_due(circuit);
        circuit.state
    }

    /// Execute an operation through the circuit.
    ///
    /// Rejects immediately with [`CircuitError::Open`] when the circuit
    /// is open; otherwise runs the operation and records its outcome.
    pub async fn call<T, E, Fut>(
        &self,
        agent_id: &str,
        operation: Fut,
    ) -> Result<T, CircuitError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let mut circuits = self.circuits.write().await;
            let circuit = circuits
                .entry(agent_id.to_string())
                .or_insert_with(|| CircuitMetrics::new(agent_id));
            self.advance_if_due(circuit);

            if circuit.state == CircuitState::Open {
                let retry_after = circuit.state_changed_at
                    + chrono::Duration::from_std(self.config.timeout)
                        .unwrap_or_else(|_| chrono::Duration::seconds(60));
                warn!(agent_id = %agent_id, "circuit open, blocking request");
                return Err(CircuitError::Open {
                    agent_id: agent_id.to_string(),
                    retry_after,
                });
            }
        }

        match operation.await {
            Ok(value) => {
                self.record_success(agent_id).await;
                Ok(value)
            }
            Err(error) => {
                self.record_failure(agent_id).await;
                Err(CircuitError::Operation(error))
            }
        }
    }

    /// Record a successful request.
    pub async fn record_success(&self, agent_id: &str) {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(agent_id.to_string())
            .or_insert_with(|| CircuitMetrics::new(agent_id));

        circuit.total_requests += 1;
        circuit.successful_requests += 1;
        circuit.consecutive_successes += 1;
        circuit.consecutive_failures = 0;
        circuit.last_success_at = Some(Utc::now());

        if circuit.state == CircuitState::HalfOpen
            && circuit.consecutive_successes >= self.config.success_threshold
        {
            circuit.close();
            info!(agent_id = %agent_id, "circuit closed, recovery successful");
        }

        debug!(
            agent_id = %agent_id,
            state = circuit.state.as_str(),
            consecutive = circuit.consecutive_successes,
            "success recorded"
        );
    }

    /// Record a failed request, tripping or re-opening as needed.
    pub async fn record_failure(&self, agent_id: &str) {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(agent_id.to_string())
            .or_insert_with(|| CircuitMetrics::new(agent_id));

        circuit.total_requests += 1;
        circuit.failed_requests += 1;
        circuit.consecutive_failures += 1;
        circuit.consecutive_successes = 0;
        circuit.last_failure_at = Some(Utc::now());

        match circuit.state {
            CircuitState::Closed => {
                if circuit.total_requests >= self.config.minimum_requests
                    && circuit.failure_rate() >= self.config.failure_threshold
                {
                    circuit.open();
                    warn!(
                        agent_id = %agent_id,
                        failure_rate = circuit.failure_rate(),
                        trip_count = circuit.trip_count,
                        "circuit opened"
                    );
                }
            }
            // Any failure while probing re-opens immediately.
            CircuitState::HalfOpen => {
                circuit.open();
                warn!(agent_id = %agent_id, "circuit re-opened from half-open");
            }
            CircuitState::Open => {}
        }
    }

    /// Force a circuit closed, clearing consecutive counters but keeping
    /// historical totals.
    pub async fn reset(&self, agent_id: &str) {
        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(agent_id) {
            let old_state = circuit.state;
            circuit.close();
            info!(agent_id = %agent_id, old_state = old_state.as_str(), "circuit reset");
        }
    }

    pub async fn get_metrics(&self, agent_id: &str) -> Option<CircuitMetrics> {
        self.circuits.read().await.get(agent_id).cloned()
    }

    /// All circuit metrics, with due open-to-half-open transitions
    /// applied first.
    pub async fn all_metrics(&self) -> HashMap<String, CircuitMetrics> {
        let mut circuits = self.circuits.write().await;
        for circuit in circuits.values_mut() {
            self.advance_if_due(circuit);
        }
        circuits.clone()
    }

    /// Agent ids whose circuits are currently open.
    pub async fn open_circuits(&self) -> Vec<String> {
        self.circuits_in_state(CircuitState::Open).await
    }

    /// Agent ids whose circuits are currently half-open.
    pub async fn half_open_circuits(&self) -> Vec<String> {
        self.circuits_in_state(CircuitState::HalfOpen).await
    }

    async fn circuits_in_state(&self, wanted: CircuitState) -> Vec<String> {
        let mut circuits = self.circuits.write().await;
        circuits
            .values_mut()
            .filter_map(|circuit| {
                self.advance_if_due(circuit);
                (circuit.state == wanted).then(|| circuit.agent_id.clone())
            })
            .collect()
    }

    /// Open circuits move to half-open once the timeout elapses.
    fn advance_if_due(&self, circuit: &mut CircuitMetrics) {
        if circuit.state != CircuitState::Open {
            return;
        }
        let elapsed = Utc::now() - circuit.state_changed_at;
        if let Ok(timeout) = chrono::Duration::from_std(self.config.timeout) {
            if elapsed >= timeout {
                circuit.half_open();
                info!(agent_id = %circuit.agent_id, "circuit half-open, probing recovery");
            }
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
