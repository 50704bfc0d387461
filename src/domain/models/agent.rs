//! Agent registration domain model.
//!
//! An agent is an endpoint that advertises capabilities to the service
//! registry and is kept alive by heartbeats.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Advertised status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Accepting work.
    Online,
    /// Alive but under load.
    Busy,
    /// Not accepting work.
    Offline,
    /// Finishing in-flight work before going offline.
    Draining,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Online
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Busy => "busy",
            Self::Offline => "offline",
            Self::Draining => "draining",
        }
    }
}

/// A named, versioned capability an agent can perform.
///
/// Equality and hashing consider only `name` and `version`, so two
/// registrations advertising the same capability compare equal even if
/// their descriptions differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapability {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
}

impl AgentCapability {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl PartialEq for AgentCapability {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.version == other.version
    }
}

impl Eq for AgentCapability {}

impl std::hash::Hash for AgentCapability {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
    }
}

/// A live entry in the service registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub capabilities: HashSet<AgentCapability>,
    pub tags: HashSet<String>,
    pub metadata: serde_json::Value,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    /// Time without a heartbeat before the registration expires.
    pub ttl: std::time::Duration,
}

impl AgentRegistration {
    /// Create a registration with default status, tags, and TTL.
    pub fn new(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        capabilities: HashSet<AgentCapability>,
    ) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            host: host.into(),
            port,
            capabilities,
            tags: HashSet::new(),
            metadata: serde_json::Value::Null,
            status: AgentStatus::Online,
            registered_at: now,
            last_heartbeat: now,
            ttl: std::time::Duration::from_secs(60),
        }
    }

    /// Whether the registration has outlived its TTL without a heartbeat.
    /// A TTL too large to represent never expires.
    pub fn is_expired(&self) -> bool {
        match Duration::from_std(self.ttl) {
            Ok(ttl) => Utc::now() - self.last_heartbeat > ttl,
            Err(_) => false,
        }
    }

    /// Refresh the liveness timestamp.
    pub fn update_heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    /// Whether the agent advertises a capability with the given name,
    /// regardless of version.
    pub fn matches_capability(&self, capability_name: &str) -> bool {
        self.capabilities.iter().any(|c| c.name == capability_name)
    }

    /// Whether the agent carries every tag in the given set.
    pub fn matches_tags(&self, tags: &HashSet<String>) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(tags: &[&str]) -> AgentRegistration {
        let mut reg = AgentRegistration::new(
            "agent-1",
            "Test Agent",
            "localhost",
            8001,
            HashSet::from([
                AgentCapability::new("process", "1.0"),
                AgentCapability::new("analyze", "1.0"),
            ]),
        );
        reg.tags = tags.iter().map(|t| (*t).to_string()).collect();
        reg
    }

    #[test]
    fn test_capability_equality_ignores_description() {
        let a = AgentCapability::new("process", "1.0").with_description("data processor");
        let b = AgentCapability::new("process", "1.0");
        let c = AgentCapability::new("process", "2.0");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set = HashSet::from([a, b, c]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_registration_defaults() {
        let reg = registration(&[]);
        assert_eq!(reg.status, AgentStatus::Online);
        assert_eq!(reg.ttl, std::time::Duration::from_secs(60));
        assert!(!reg.is_expired());
    }

    #[test]
    fn test_expiry() {
        let mut reg = registration(&[]);
        reg.ttl = std::time::Duration::from_secs(1);
        assert!(!reg.is_expired());

        reg.last_heartbeat = Utc::now() - Duration::seconds(2);
        assert!(reg.is_expired());

        reg.update_heartbeat();
        assert!(!reg.is_expired());
    }

    #[test]
    fn test_matches_capability() {
        let reg = registration(&[]);
        assert!(reg.matches_capability("process"));
        assert!(reg.matches_capability("analyze"));
        assert!(!reg.matches_capability("unknown"));
    }

    #[test]
    fn test_matches_tags_requires_all() {
        let reg = registration(&["ml", "python", "data"]);
        assert!(reg.matches_tags(&HashSet::from(["ml".to_string()])));
        assert!(reg.matches_tags(&HashSet::from(["ml".to_string(), "python".to_string()])));
        assert!(!reg.matches_tags(&HashSet::from(["ml".to_string(), "java".to_string()])));
    }
}
