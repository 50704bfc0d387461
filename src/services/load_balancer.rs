//! Healthy-agent selection under pluggable balancing policies.
//!
//! Candidates come from the registry (by capability, tags, or all live
//! agents), are optionally intersected with the health monitor's healthy
//! set, and one is chosen by the configured strategy. Connection
//! accounting tracks in-flight requests per agent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::health_monitor::HealthMonitor;
use super::service_registry::ServiceRegistry;
use crate::domain::models::{AgentRegistration, BalancerSettings, HealthStatus};

/// Load balancing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Advance a shared index modulo the candidate count.
    RoundRobin,
    /// Fewest active connections; ties broken by candidate order.
    LeastConnections,
    /// Random draw biased by per-agent weight.
    Weighted,
    /// Uniform random draw.
    Random,
}

impl LoadBalancingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastConnections => "least_connections",
            Self::Weighted => "weighted",
            Self::Random => "random",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "round_robin" => Some(Self::RoundRobin),
            "least_connections" => Some(Self::LeastConnections),
            "weighted" => Some(Self::Weighted),
            "random" => Some(Self::Random),
            _ => None,
        }
    }
}

/// Load balancer errors.
#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("No available agents for capability={capability:?}, tags={tags:?}")]
    NoAvailableAgents {
        capability: Option<String>,
        tags: Option<Vec<String>>,
    },
}

/// Per-agent request accounting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalancerMetrics {
    pub agent_id: String,
    pub total_requests: u64,
    pub active_connections: u64,
    pub total_connections: u64,
    pub failed_requests: u64,
    pub last_selected: Option<DateTime<Utc>>,
}

impl BalancerMetrics {
    fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        (self.total_requests - self.failed_requests) as f64 / self.total_requests as f64
    }
}

/// Outcome of a selection.
#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub agent: AgentRegistration,
    pub strategy: LoadBalancingStrategy,
    pub metrics: BalancerMetrics,
    /// The monitor's view of the agent at selection time; `true` when no
    /// monitor is attached.
    pub healthy: bool,
}

/// Balancer configuration.
#[derive(Debug, Clone)]
pub struct LoadBalancerConfig {
    pub strategy: LoadBalancingStrategy,
    pub default_weight: u32,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::RoundRobin,
            default_weight: 1,
        }
    }
}

impl From<&BalancerSettings> for LoadBalancerConfig {
    fn from(settings: &BalancerSettings) -> Self {
        Self {
            strategy: LoadBalancingStrategy::from_str(&settings.strategy)
                .unwrap_or(LoadBalancingStrategy::RoundRobin),
            default_weight: settings.default_weight,
        }
    }
}

/// Agent selector with connection accounting.
pub struct LoadBalancer {
    registry: Arc<ServiceRegistry>,
    health_monitor: Option<Arc<HealthMonitor>>,
    strategy: RwLock<LoadBalancingStrategy>,
    default_weight: u32,
    metrics: RwLock<HashMap<String, BalancerMetrics>>,
    weights: RwLock<HashMap<String, u32>>,
    round_robin_index: Mutex<usize>,
}

impl LoadBalancer {
    pub fn new(registry: Arc<ServiceRegistry>, config: LoadBalancerConfig) -> Self {
        Self {
            registry,
            health_monitor: None,
            strategy: RwLock::new(config.strategy),
            default_weight: config.default_weight,
            metrics: RwLock::new(HashMap::new()),
            weights: RwLock::new(HashMap::new()),
            round_robin_index: Mutex::new(0),
        }
    }

    pub fn with_defaults(registry: Arc<ServiceRegistry>) -> Self {
        Self::new(registry, LoadBalancerConfig::default())
    }

    /// Attach a health monitor for health-gated selection.
    pub fn with_health_monitor(mut self, monitor: Arc<HealthMonitor>) -> Self {
        self.health_monitor = Some(monitor);
        self
    }

    pub async fn strategy(&self) -> LoadBalancingStrategy {
        *self.strategy.read().await
    }

    /// Change the balancing strategy at runtime.
    pub async fn set_strategy(&self, strategy: LoadBalancingStrategy) {
        info!(strategy = strategy.as_str(), "balancing strategy changed");
        *self.strategy.write().await = strategy;
    }

    /// Set an agent's weight for the weighted strategy.
    pub async fn set_weight(&self, agent_id: impl Into<String>, weight: u32) {
        self.weights.write().await.insert(agent_id.into(), weight);
    }

    pub async fn get_weight(&self, agent_id: &str) -> u32 {
        self.weights
            .read()
            .await
            .get(agent_id)
            .copied()
            .unwrap_or(self.default_weight)
    }

    /// Select an agent matching the capability/tag predicate.
    ///
    /// With `require_healthy` and an attached monitor, only currently
    /// healthy agents are considered. Raises
    /// [`BalancerError::NoAvailableAgents`] when nothing matches.
    pub async fn select_agent(
        &self,
        capability: Option<&str>,
        tags: Option<&HashSet<String>>,
        require_healthy: bool,
    ) -> Result<SelectionResult, BalancerError> {
        let candidates = self.candidates(capability, tags, require_healthy).await;
        if candidates.is_empty() {
            return Err(BalancerError::NoAvailableAgents {
                capability: capability.map(ToString::to_string),
                tags: tags.map(|t| t.iter().cloned().collect()),
            });
        }

        let strategy = *self.strategy.read().await;
        let agent = match strategy {
            LoadBalancingStrategy::RoundRobin => self.pick_round_robin(&candidates).await,
            LoadBalancingStrategy::LeastConnections => {
                self.pick_least_connections(&candidates).await
            }
            LoadBalancingStrategy::Weighted => self.pick_weighted(&candidates).await,
            LoadBalancingStrategy::Random => pick_random(&candidates),
        };

        let metrics = {
            let mut metrics = self.metrics.write().await;
            let entry = metrics
                .entry(agent.agent_id.clone())
                .or_insert_with(|| BalancerMetrics::new(agent.agent_id.as_str()));
            entry.last_selected = Some(Utc::now());
            entry.clone()
        };

        let healthy = match &self.health_monitor {
            Some(monitor) => {
                monitor.get_health_status(&agent.agent_id).await == HealthStatus::Healthy
            }
            None => true,
        };

        debug!(
            agent_id = %agent.agent_id,
            strategy = strategy.as_str(),
            healthy,
            "agent selected"
        );
        Ok(SelectionResult {
            agent,
            strategy,
            metrics,
            healthy,
        })
    }

    /// Record an acquired connection for an agent.
    pub async fn acquire(&self, agent_id: &str) {
        let mut metrics = self.metrics.write().await;
        let entry = metrics
            .entry(agent_id.to_string())
            .or_insert_with(|| BalancerMetrics::new(agent_id));
        entry.active_connections += 1;
        entry.total_connections += 1;
        entry.total_requests += 1;
    }

    /// Release a connection. Unknown ids are ignored; the active count
    /// floors at zero.
    pub async fn release(&self, agent_id: &str, failed: bool) {
        let mut metrics = self.metrics.write().await;
        let Some(entry) = metrics.get_mut(agent_id) else {
            return;
        };
        entry.active_connections = entry.active_connections.saturating_sub(1);
        if failed {
            entry.failed_requests += 1;
        }
    }

    pub async fn get_metrics(&self, agent_id: &str) -> Option<BalancerMetrics> {
        self.metrics.read().await.get(agent_id).cloned()
    }

    pub async fn all_metrics(&self) -> HashMap<String, BalancerMetrics> {
        self.metrics.read().await.clone()
    }

    /// Reset metrics for one agent, or for all when `agent_id` is `None`.
    pub async fn reset_metrics(&self, agent_id: Option<&str>) {
        let mut metrics = self.metrics.write().await;
        match agent_id {
            Some(agent_id) => {
                if metrics.contains_key(agent_id) {
                    metrics.insert(agent_id.to_string(), BalancerMetrics::new(agent_id));
                }
            }
            None => {
                for (agent_id, entry) in metrics.iter_mut() {
                    *entry = BalancerMetrics::new(agent_id.as_str());
                }
            }
        }
    }

    /// Assemble candidates: registry predicate filter, then optional
    /// health intersection, sorted by agent id so round-robin has a
    /// stable base order.
    async fn candidates(
        &self,
        capability: Option<&str>,
        tags: Option<&HashSet<String>>,
        require_healthy: bool,
    ) -> Vec<AgentRegistration> {
        let mut candidates = if let Some(capability) = capability {
            self.registry.find_by_capability(capability, None).await
        } else if let Some(tags) = tags {
            self.registry.find_by_tags(tags).await
        } else {
            self.registry.list_all(None).await
        };
        candidates.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

        if require_healthy {
            if let Some(monitor) = &self.health_monitor {
                let healthy: HashSet<String> = monitor.healthy_agents().await.into_iter().collect();
                candidates.retain(|c| healthy.contains(&c.agent_id));
            }
        }
        candidates
    }

    async fn pick_round_robin(&self, candidates: &[AgentRegistration]) -> AgentRegistration {
        let mut index = self.round_robin_index.lock().await;
        let agent = candidates[*index % candidates.len()].clone();
        *index = (*index + 1) % candidates.len();
        agent
    }

    async fn pick_least_connections(&self, candidates: &[AgentRegistration]) -> AgentRegistration {
        let metrics = self.metrics.read().await;
        let mut selected = &candidates[0];
        let mut min_connections = u64::MAX;

        for candidate in candidates {
            let connections = metrics
                .get(&candidate.agent_id)
                .map_or(0, |m| m.active_connections);
            if connections < min_connections {
                min_connections = connections;
                selected = candidate;
            }
        }
        selected.clone()
    }

    async fn pick_weighted(&self, candidates: &[AgentRegistration]) -> AgentRegistration {
        let weights = self.weights.read().await;
        let per_candidate: Vec<u64> = candidates
            .iter()
            .map(|c| {
                u64::from(
                    weights
                        .get(&c.agent_id)
                        .copied()
                        .unwrap_or(self.default_weight),
                )
            })
            .collect();
        drop(weights);

        let total: u64 = per_candidate.iter().sum();
        if total == 0 {
            // All weights zero: uniform fallback.
            return pick_random(candidates);
        }

        let mut remaining = rand::thread_rng().gen_range(0..total);
        for (candidate, weight) in candidates.iter().zip(per_candidate) {
            if remaining < weight {
                return candidate.clone();
            }
            remaining -= weight;
        }
        candidates[candidates.len() - 1].clone()
    }
}

fn pick_random(candidates: &[AgentRegistration]) -> AgentRegistration {
    let index = rand::thread_rng().gen_range(0..candidates.len());
    candidates[index].clone()
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("default_weight", &self.default_weight)
            .finish_non_exhaustive()
    }
}
