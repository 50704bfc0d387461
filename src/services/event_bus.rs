//! Lifecycle event distribution.
//!
//! A broadcast-based bus carrying task lifecycle notifications and metric
//! snapshots. Publishing is best-effort: events published with no live
//! subscriber are dropped, and the core never requires a bus to be
//! attached.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::task_queue::TaskStatistics;
use super::worker_pool::WorkerPoolMetrics;
use crate::domain::models::TaskPriority;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event payloads published by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    TaskCreated {
        task_id: Uuid,
        name: String,
        priority: TaskPriority,
        workflow_id: Option<String>,
        /// Correlation id of the external event that triggered submission.
        trigger_event_id: Option<Uuid>,
        created_at: DateTime<Utc>,
    },
    TaskStarted {
        task_id: Uuid,
        name: String,
        worker_id: Option<String>,
        workflow_id: Option<String>,
        started_at: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: Uuid,
        name: String,
        workflow_id: Option<String>,
        result: Option<serde_json::Value>,
        duration_ms: Option<f64>,
        completed_at: DateTime<Utc>,
    },
    TaskFailed {
        task_id: Uuid,
        name: String,
        workflow_id: Option<String>,
        error: String,
        retry_count: u32,
        failed_at: DateTime<Utc>,
    },
    TaskCancelled {
        task_id: Uuid,
        name: String,
        reason: String,
    },
    TaskTimeout {
        task_id: Uuid,
        name: String,
        reason: String,
    },
    MetricsSnapshot {
        queue: TaskStatistics,
        pool: Option<WorkerPoolMetrics>,
        timestamp: DateTime<Utc>,
    },
}

impl EventPayload {
    /// Dotted event kind, e.g. `task.created`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task.created",
            Self::TaskStarted { .. } => "task.started",
            Self::TaskCompleted { .. } => "task.completed",
            Self::TaskFailed { .. } => "task.failed",
            Self::TaskCancelled { .. } => "task.cancelled",
            Self::TaskTimeout { .. } => "task.timeout",
            Self::MetricsSnapshot { .. } => "metrics.snapshot",
        }
    }
}

/// Event envelope with bus-assigned identity and ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    pub id: EventId,
    /// Monotonically increasing per-bus sequence number.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

/// EventBus configuration.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Broadcast channel capacity; slow subscribers past this lag see
    /// `RecvError::Lagged`.
    pub capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Broadcast fan-out of orchestration events.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestrationEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EventBusConfig::default())
    }

    /// Subscribe to all subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, assigning id, sequence, and timestamp.
    ///
    /// Returns the enveloped event. Delivery is best-effort: with no
    /// active subscriber the event is dropped.
    pub fn publish(&self, payload: EventPayload) -> OrchestrationEvent {
        let event = OrchestrationEvent {
            id: EventId::new(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            payload,
        };
        let _ = self.sender.send(event.clone());
        event
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_defaults()
    }
}
