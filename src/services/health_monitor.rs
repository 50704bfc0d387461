//! Periodic health checks over registered agents.
//!
//! Each agent may have a custom probe; without one the default probe
//! reports healthy iff the agent is still registered and unexpired.
//! Check results drive per-agent metrics (EMA latency, consecutive
//! failures) and feed derived status back into the registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::service_registry::ServiceRegistry;
use crate::domain::models::{
    AgentStatus, HealthCheckResult, HealthMetrics, HealthSettings, HealthStatus,
};
use crate::domain::ports::HealthProbe;

/// Health monitor configuration.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Time between check cycles.
    pub check_interval: Duration,
    /// Consecutive failures before an agent is reported unhealthy.
    pub failure_threshold: u32,
    /// Per-probe timeout; expiry counts as an unhealthy check.
    pub response_timeout: Duration,
    /// Latency above which a passing check reads as degraded.
    pub degraded_threshold_ms: f64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            failure_threshold: 3,
            response_timeout: Duration::from_secs(5),
            degraded_threshold_ms: 1000.0,
        }
    }
}

impl From<&HealthSettings> for HealthMonitorConfig {
    fn from(settings: &HealthSettings) -> Self {
        Self {
            check_interval: Duration::from_secs(settings.check_interval_seconds),
            failure_threshold: settings.failure_threshold,
            response_timeout: Duration::from_secs_f64(settings.response_timeout_seconds),
            degraded_threshold_ms: settings.degraded_threshold_ms,
        }
    }
}

/// Periodic liveness monitor with registry feedback.
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    config: HealthMonitorConfig,
    metrics: RwLock<HashMap<String, HealthMetrics>>,
    probes: RwLock<HashMap<String, Arc<dyn HealthProbe>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ServiceRegistry>, config: HealthMonitorConfig) -> Self {
        Self {
            registry,
            config,
            metrics: RwLock::new(HashMap::new()),
            probes: RwLock::new(HashMap::new()),
            monitor: Mutex::new(None),
        }
    }

    pub fn with_defaults(registry: Arc<ServiceRegistry>) -> Self {
        Self::new(registry, HealthMonitorConfig::default())
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    /// Bind a custom probe to an agent, replacing any previous probe.
    pub async fn register_probe(&self, agent_id: impl Into<String>, probe: Arc<dyn HealthProbe>) {
        let agent_id = agent_id.into();
        debug!(agent_id = %agent_id, "health probe registered");
        self.probes.write().await.insert(agent_id, probe);
    }

    /// Remove a custom probe. Returns whether one existed.
    pub async fn unregister_probe(&self, agent_id: &str) -> bool {
        self.probes.write().await.remove(agent_id).is_some()
    }

    /// Run one check against an agent, updating metrics and feeding the
    /// derived status back into the registry.
    pub async fn check_health(&self, agent_id: &str) -> HealthCheckResult {
        let start = Instant::now();
        let probe = self.probes.read().await.get(agent_id).cloned();

        let result = match probe {
            Some(probe) => {
                match tokio::time::timeout(self.config.response_timeout, probe.check()).await {
                    Ok(Ok(is_healthy)) => {
                        self.derive_result(agent_id, is_healthy, elapsed_ms(start))
                    }
                    Ok(Err(probe_error)) => HealthCheckResult::new(
                        agent_id,
                        HealthStatus::Unhealthy,
                        elapsed_ms(start),
                    )
                    .with_error(probe_error.to_string()),
                    Err(_) => HealthCheckResult::new(
                        agent_id,
                        HealthStatus::Unhealthy,
                        self.config.response_timeout.as_secs_f64() * 1000.0,
                    )
                    .with_error("Health check timeout"),
                }
            }
            None => {
                // Default probe: registered and unexpired.
                let is_healthy = self.registry.get(agent_id).await.is_some();
                self.derive_result(agent_id, is_healthy, elapsed_ms(start))
            }
        };

        let consecutive_failures = {
            let mut metrics = self.metrics.write().await;
            let entry = metrics
                .entry(agent_id.to_string())
                .or_insert_with(|| HealthMetrics::new(agent_id));
            entry.update_from_result(&result);
            entry.consecutive_failures
        };

        self.feed_registry(agent_id, &result, consecutive_failures)
            .await;

        debug!(
            agent_id = %agent_id,
            status = result.status.as_str(),
            response_time_ms = result.response_time_ms,
            error = result.error.as_deref(),
            "health check completed"
        );
        result
    }

    /// Per-check status: probe verdict plus the latency threshold.
    fn derive_result(&self, agent_id: &str, is_healthy: bool, response_ms: f64) -> HealthCheckResult {
        let status = if !is_healthy {
            HealthStatus::Unhealthy
        } else if response_ms > self.config.degraded_threshold_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        HealthCheckResult::new(agent_id, status, response_ms)
    }

    /// Registry feedback: offline past the failure threshold, busy when
    /// degraded, online when healthy.
    async fn feed_registry(
        &self,
        agent_id: &str,
        result: &HealthCheckResult,
        consecutive_failures: u32,
    ) {
        if consecutive_failures >= self.config.failure_threshold {
            self.registry
                .update_status(agent_id, AgentStatus::Offline)
                .await;
        } else if result.status == HealthStatus::Degraded {
            self.registry.update_status(agent_id, AgentStatus::Busy).await;
        } else if result.status == HealthStatus::Healthy {
            self.registry
                .update_status(agent_id, AgentStatus::Online)
                .await;
        }
    }

    /// Persistent status for an agent, recomputed from its metrics.
    pub async fn get_health_status(&self, agent_id: &str) -> HealthStatus {
        let metrics = self.metrics.read().await;
        let Some(metrics) = metrics.get(agent_id) else {
            return HealthStatus::Unknown;
        };

        if metrics.consecutive_failures >= self.config.failure_threshold {
            return HealthStatus::Unhealthy;
        }
        if metrics.last_check.is_none() {
            return HealthStatus::Unknown;
        }

        // Last check succeeded iff its timestamp matches the last success.
        if metrics.last_success == metrics.last_check {
            if metrics.average_response_time_ms > self.config.degraded_threshold_ms {
                return HealthStatus::Degraded;
            }
            return HealthStatus::Healthy;
        }

        HealthStatus::Unhealthy
    }

    pub async fn get_metrics(&self, agent_id: &str) -> Option<HealthMetrics> {
        self.metrics.read().await.get(agent_id).cloned()
    }

    pub async fn all_metrics(&self) -> HashMap<String, HealthMetrics> {
        self.metrics.read().await.clone()
    }

    /// Agents currently reading healthy.
    pub async fn healthy_agents(&self) -> Vec<String> {
        self.agents_with_status(HealthStatus::Healthy).await
    }

    /// Agents currently reading unhealthy.
    pub async fn unhealthy_agents(&self) -> Vec<String> {
        self.agents_with_status(HealthStatus::Unhealthy).await
    }

    async fn agents_with_status(&self, wanted: HealthStatus) -> Vec<String> {
        let ids: Vec<String> = self.metrics.read().await.keys().cloned().collect();
        let mut matching = Vec::new();
        for agent_id in ids {
            if self.get_health_status(&agent_id).await == wanted {
                matching.push(agent_id);
            }
        }
        matching
    }

    /// Check every live registration concurrently.
    pub async fn check_all(&self) -> Vec<HealthCheckResult> {
        let agents = self.registry.list_all(None).await;
        if agents.is_empty() {
            return Vec::new();
        }

        let checks = agents
            .iter()
            .map(|agent| self.check_health(&agent.agent_id));
        let results = futures::future::join_all(checks).await;

        let healthy = results.iter().filter(|r| r.is_healthy()).count();
        info!(
            total_agents = results.len(),
            healthy_agents = healthy,
            unhealthy_agents = results.len() - healthy,
            "health check cycle completed"
        );
        results
    }

    /// Start the periodic check loop. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return;
        }

        let this = Arc::clone(self);
        *monitor = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(this.config.check_interval).await;
                this.check_all().await;
            }
        }));
        info!(
            check_interval_s = self.config.check_interval.as_secs(),
            failure_threshold = self.config.failure_threshold,
            "health monitor started"
        );
    }

    /// Stop the periodic check loop. Idempotent.
    pub async fn stop(&self) {
        let mut monitor = self.monitor.lock().await;
        if let Some(handle) = monitor.take() {
            handle.abort();
            info!("health monitor stopped");
        } else {
            warn!("health monitor stop with no active loop");
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
