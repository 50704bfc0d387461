//! In-memory, TTL-bounded catalog of agent endpoints.
//!
//! Registrations expire once their TTL elapses without a heartbeat.
//! Reads never return expired entries; a background sweeper physically
//! removes them every `cleanup_interval`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::models::{AgentCapability, AgentRegistration, AgentStatus, RegistrySettings};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid registration: {0}")]
    RegistrationInvalid(String),
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Cadence of the background expiry sweep.
    pub cleanup_interval: Duration,
    /// TTL applied when a registration does not specify one.
    pub default_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(30),
            default_ttl: Duration::from_secs(60),
        }
    }
}

impl From<&RegistrySettings> for RegistryConfig {
    fn from(settings: &RegistrySettings) -> Self {
        Self {
            cleanup_interval: Duration::from_secs(settings.cleanup_interval_seconds),
            default_ttl: Duration::from_secs(settings.default_ttl_seconds),
        }
    }
}

/// Parameters for registering an agent.
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub agent_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub capabilities: HashSet<AgentCapability>,
    pub status: AgentStatus,
    pub tags: HashSet<String>,
    pub metadata: serde_json::Value,
    /// `None` uses the registry's default TTL.
    pub ttl: Option<Duration>,
}

impl RegisterRequest {
    pub fn new(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        capabilities: HashSet<AgentCapability>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            host: host.into(),
            port,
            capabilities,
            status: AgentStatus::Online,
            tags: HashSet::new(),
            metadata: serde_json::Value::Null,
            ttl: None,
        }
    }

    pub fn with_tags(mut self, tags: HashSet<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Agent registration catalog with TTL expiry.
pub struct ServiceRegistry {
    config: RegistryConfig,
    registry: Arc<RwLock<HashMap<String, AgentRegistration>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            registry: Arc::new(RwLock::new(HashMap::new())),
            sweeper: Mutex::new(None),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RegistryConfig::default())
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Start the background expiry sweeper. Idempotent.
    pub async fn start(&self) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            return;
        }

        let registry = Arc::clone(&self.registry);
        let interval = self.config.cleanup_interval;
        *sweeper = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let mut map = registry.write().await;
                let before = map.len();
                map.retain(|_, reg| !reg.is_expired());
                let swept = before - map.len();
                drop(map);
                if swept > 0 {
                    info!(swept, "expired registrations purged");
                }
            }
        }));
        info!(
            cleanup_interval_s = self.config.cleanup_interval.as_secs(),
            "registry sweeper started"
        );
    }

    /// Stop the sweeper. Idempotent.
    pub async fn stop(&self) {
        let mut sweeper = self.sweeper.lock().await;
        if let Some(handle) = sweeper.take() {
            handle.abort();
            info!("registry sweeper stopped");
        }
    }

    /// Register an agent, overwriting any previous registration with the
    /// same id.
    pub async fn register(
        &self,
        request: RegisterRequest,
    ) -> Result<AgentRegistration, RegistryError> {
        if request.agent_id.trim().is_empty() {
            return Err(RegistryError::RegistrationInvalid(
                "agent_id cannot be empty".to_string(),
            ));
        }
        if request.name.trim().is_empty() {
            return Err(RegistryError::RegistrationInvalid(
                "name cannot be empty".to_string(),
            ));
        }
        if request.port == 0 {
            return Err(RegistryError::RegistrationInvalid(
                "port must be between 1 and 65535".to_string(),
            ));
        }
        if request.capabilities.is_empty() {
            return Err(RegistryError::RegistrationInvalid(
                "at least one capability is required".to_string(),
            ));
        }

        let mut registration = AgentRegistration::new(
            request.agent_id,
            request.name,
            request.host,
            request.port,
            request.capabilities,
        );
        registration.status = request.status;
        registration.tags = request.tags;
        registration.metadata = request.metadata;
        registration.ttl = request.ttl.unwrap_or(self.config.default_ttl);

        let mut map = self.registry.write().await;
        let replaced = map
            .insert(registration.agent_id.clone(), registration.clone())
            .is_some();
        drop(map);

        info!(
            agent_id = %registration.agent_id,
            replaced,
            capabilities = registration.capabilities.len(),
            "agent registered"
        );
        Ok(registration)
    }

    /// Remove a registration. Returns whether one existed.
    pub async fn deregister(&self, agent_id: &str) -> bool {
        let removed = self.registry.write().await.remove(agent_id).is_some();
        if removed {
            info!(agent_id = %agent_id, "agent deregistered");
        }
        removed
    }

    /// Refresh an agent's liveness. Returns false for unknown ids.
    pub async fn heartbeat(&self, agent_id: &str) -> bool {
        let mut map = self.registry.write().await;
        match map.get_mut(agent_id) {
            Some(registration) => {
                registration.update_heartbeat();
                true
            }
            None => {
                warn!(agent_id = %agent_id, "heartbeat for unknown agent");
                false
            }
        }
    }

    /// Overwrite an agent's advertised status. Returns false for unknown
    /// ids.
    pub async fn update_status(&self, agent_id: &str, status: AgentStatus) -> bool {
        let mut map = self.registry.write().await;
        match map.get_mut(agent_id) {
            Some(registration) => {
                debug!(agent_id = %agent_id, status = status.as_str(), "agent status updated");
                registration.status = status;
                true
            }
            None => false,
        }
    }

    /// Fetch a live registration. Expired entries read as absent.
    pub async fn get(&self, agent_id: &str) -> Option<AgentRegistration> {
        let map = self.registry.read().await;
        map.get(agent_id).filter(|r| !r.is_expired()).cloned()
    }

    /// Live agents advertising a capability name, optionally filtered by
    /// status.
    pub async fn find_by_capability(
        &self,
        capability: &str,
        status: Option<AgentStatus>,
    ) -> Vec<AgentRegistration> {
        let map = self.registry.read().await;
        map.values()
            .filter(|r| !r.is_expired() && r.matches_capability(capability))
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect()
    }

    /// Live agents carrying every tag in the set.
    pub async fn find_by_tags(&self, tags: &HashSet<String>) -> Vec<AgentRegistration> {
        let map = self.registry.read().await;
        map.values()
            .filter(|r| !r.is_expired() && r.matches_tags(tags))
            .cloned()
            .collect()
    }

    /// All live registrations, optionally filtered by status.
    pub async fn list_all(&self, status: Option<AgentStatus>) -> Vec<AgentRegistration> {
        let map = self.registry.read().await;
        map.values()
            .filter(|r| !r.is_expired())
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect()
    }

    /// Count of live registrations, optionally filtered by status.
    pub async fn count(&self, status: Option<AgentStatus>) -> usize {
        self.list_all(status).await.len()
    }

    /// Immediately purge expired registrations, returning how many were
    /// removed.
    pub async fn purge_expired(&self) -> usize {
        let mut map = self.registry.write().await;
        let before = map.len();
        map.retain(|_, reg| !reg.is_expired());
        before - map.len()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(names: &[&str]) -> HashSet<AgentCapability> {
        names
            .iter()
            .map(|n| AgentCapability::new(*n, "1.0"))
            .collect()
    }

    fn request(agent_id: &str, capability: &str) -> RegisterRequest {
        RegisterRequest::new(agent_id, format!("{agent_id} name"), "localhost", 8001, caps(&[capability]))
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = ServiceRegistry::with_defaults();
        let registration = registry
            .register(
                request("agent-1", "process")
                    .with_tags(HashSet::from(["ml".to_string()]))
                    .with_ttl(Duration::from_secs(120)),
            )
            .await
            .unwrap();

        assert_eq!(registration.agent_id, "agent-1");
        assert_eq!(registration.ttl, Duration::from_secs(120));

        let fetched = registry.get("agent-1").await.unwrap();
        assert_eq!(fetched.agent_id, "agent-1");
        assert!(fetched.tags.contains("ml"));
        assert!(registry.get("agent-2").await.is_none());
    }

    #[tokio::test]
    async fn test_register_validation() {
        let registry = ServiceRegistry::with_defaults();

        assert!(registry
            .register(request("", "process"))
            .await
            .is_err());
        assert!(registry
            .register(RegisterRequest::new("agent-1", "", "localhost", 8001, caps(&["p"])))
            .await
            .is_err());
        assert!(registry
            .register(RegisterRequest::new("agent-1", "name", "localhost", 0, caps(&["p"])))
            .await
            .is_err());
        assert!(registry
            .register(RegisterRequest::new(
                "agent-1",
                "name",
                "localhost",
                8001,
                HashSet::new()
            ))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_reregistration_overwrites() {
        let registry = ServiceRegistry::with_defaults();
        registry.register(request("agent-1", "process")).await.unwrap();
        registry.register(request("agent-1", "analyze")).await.unwrap();

        let fetched = registry.get("agent-1").await.unwrap();
        assert!(fetched.matches_capability("analyze"));
        assert!(!fetched.matches_capability("process"));
        assert_eq!(registry.count(None).await, 1);
    }

    #[tokio::test]
    async fn test_deregister() {
        let registry = ServiceRegistry::with_defaults();
        registry.register(request("agent-1", "process")).await.unwrap();

        assert!(registry.deregister("agent-1").await);
        assert!(registry.get("agent-1").await.is_none());
        assert!(!registry.deregister("agent-1").await);
    }

    #[tokio::test]
    async fn test_heartbeat() {
        let registry = ServiceRegistry::with_defaults();
        registry.register(request("agent-1", "process")).await.unwrap();

        let before = registry.get("agent-1").await.unwrap().last_heartbeat;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(registry.heartbeat("agent-1").await);
        let after = registry.get("agent-1").await.unwrap().last_heartbeat;
        assert!(after > before);

        assert!(!registry.heartbeat("agent-2").await);
    }

    #[tokio::test]
    async fn test_update_status() {
        let registry = ServiceRegistry::with_defaults();
        registry.register(request("agent-1", "process")).await.unwrap();

        assert!(registry.update_status("agent-1", AgentStatus::Busy).await);
        assert_eq!(
            registry.get("agent-1").await.unwrap().status,
            AgentStatus::Busy
        );
        assert!(!registry.update_status("agent-2", AgentStatus::Offline).await);
    }

    #[tokio::test]
    async fn test_find_by_capability() {
        let registry = ServiceRegistry::with_defaults();
        registry.register(request("agent-1", "process")).await.unwrap();
        registry.register(request("agent-2", "analyze")).await.unwrap();
        registry
            .register(RegisterRequest::new(
                "agent-3",
                "multi",
                "localhost",
                8003,
                caps(&["process", "analyze"]),
            ))
            .await
            .unwrap();

        let processors = registry.find_by_capability("process", None).await;
        let ids: HashSet<String> = processors.into_iter().map(|r| r.agent_id).collect();
        assert_eq!(
            ids,
            HashSet::from(["agent-1".to_string(), "agent-3".to_string()])
        );
    }

    #[tokio::test]
    async fn test_find_by_capability_with_status() {
        let registry = ServiceRegistry::with_defaults();
        registry.register(request("agent-1", "process")).await.unwrap();
        registry
            .register(request("agent-2", "process").with_status(AgentStatus::Busy))
            .await
            .unwrap();

        let online = registry
            .find_by_capability("process", Some(AgentStatus::Online))
            .await;
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].agent_id, "agent-1");

        let busy = registry
            .find_by_capability("process", Some(AgentStatus::Busy))
            .await;
        assert_eq!(busy.len(), 1);
        assert_eq!(busy[0].agent_id, "agent-2");
    }

    #[tokio::test]
    async fn test_find_by_tags_and_match() {
        let registry = ServiceRegistry::with_defaults();
        registry
            .register(
                request("agent-1", "process")
                    .with_tags(HashSet::from(["ml".to_string(), "python".to_string()])),
            )
            .await
            .unwrap();
        registry
            .register(
                request("agent-2", "process").with_tags(HashSet::from(["python".to_string()])),
            )
            .await
            .unwrap();

        let ml = registry.find_by_tags(&HashSet::from(["ml".to_string()])).await;
        assert_eq!(ml.len(), 1);
        assert_eq!(ml[0].agent_id, "agent-1");

        let python = registry
            .find_by_tags(&HashSet::from(["python".to_string()]))
            .await;
        assert_eq!(python.len(), 2);

        let both = registry
            .find_by_tags(&HashSet::from(["ml".to_string(), "python".to_string()]))
            .await;
        assert_eq!(both.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_agents_hidden_from_reads() {
        let registry = ServiceRegistry::with_defaults();
        registry
            .register(request("agent-1", "process").with_ttl(Duration::from_millis(50)))
            .await
            .unwrap();

        assert_eq!(registry.count(None).await, 1);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(registry.get("agent-1").await.is_none());
        assert!(registry.find_by_capability("process", None).await.is_empty());
        assert_eq!(registry.count(None).await, 0);

        // Physically still present until a sweep runs.
        assert_eq!(registry.purge_expired().await, 1);
        assert_eq!(registry.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn test_sweeper_purges() {
        let registry = ServiceRegistry::new(RegistryConfig {
            cleanup_interval: Duration::from_millis(100),
            default_ttl: Duration::from_secs(60),
        });
        registry
            .register(request("agent-1", "process").with_ttl(Duration::from_millis(10)))
            .await
            .unwrap();

        registry.start().await;
        registry.start().await; // idempotent

        tokio::time::sleep(Duration::from_millis(350)).await;
        // The sweeper removed the entry physically; reads agree.
        assert_eq!(registry.purge_expired().await, 0);
        assert!(registry.get("agent-1").await.is_none());

        registry.stop().await;
        registry.stop().await; // idempotent
    }
}
