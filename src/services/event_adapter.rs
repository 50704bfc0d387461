//! External event to task submission bridge.
//!
//! The adapter is an optional collaborator: it translates external
//! trigger events into queue submissions (correlating the resulting
//! `task.created` event with the trigger id) and publishes metric
//! snapshots. The core never assumes an adapter is attached.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::event_bus::{EventBus, EventPayload};
use super::task_queue::{EnqueueOptions, QueueError, TaskQueue};
use super::worker_pool::WorkerPool;
use crate::domain::models::TaskPriority;

/// An external event offered to the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Correlation id carried through to `task.created`.
    pub event_id: Uuid,
    /// Dotted event type, e.g. `orchestration.task.trigger`.
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl TriggerEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Adapter errors.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("event type '{event_type}' does not match pattern '{pattern}'")]
    PatternMismatch { event_type: String, pattern: String },

    #[error("event payload is missing task name field '{0}'")]
    MissingTaskName(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Field mapping from event payloads to task submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventToTaskMapping {
    /// Event type pattern; a trailing `*` matches any suffix.
    pub event_pattern: String,
    pub task_name_field: String,
    /// Field holding the task payload; when absent the full event
    /// payload is used.
    pub payload_field: String,
    pub priority_field: String,
    pub workflow_id_field: String,
    pub timeout_field: String,
    pub default_priority: TaskPriority,
}

impl Default for EventToTaskMapping {
    fn default() -> Self {
        Self {
            event_pattern: "orchestration.task.*".to_string(),
            task_name_field: "task_name".to_string(),
            payload_field: "payload".to_string(),
            priority_field: "priority".to_string(),
            workflow_id_field: "workflow_id".to_string(),
            timeout_field: "timeout_seconds".to_string(),
            default_priority: TaskPriority::Normal,
        }
    }
}

impl EventToTaskMapping {
    /// Whether an event type matches the pattern.
    pub fn matches(&self, event_type: &str) -> bool {
        match self.event_pattern.strip_suffix('*') {
            Some(prefix) => event_type.starts_with(prefix),
            None => event_type == self.event_pattern,
        }
    }
}

/// Translates trigger events into queue submissions.
pub struct EventTaskAdapter {
    queue: Arc<TaskQueue>,
    bus: Arc<EventBus>,
    mapping: EventToTaskMapping,
}

impl EventTaskAdapter {
    pub fn new(queue: Arc<TaskQueue>, bus: Arc<EventBus>, mapping: EventToTaskMapping) -> Self {
        Self { queue, bus, mapping }
    }

    pub fn mapping(&self) -> &EventToTaskMapping {
        &self.mapping
    }

    /// Convert an event into a task submission.
    ///
    /// Extracts the task name, payload, priority, workflow id, and
    /// timeout per the mapping, enqueues the task, and returns its id.
    /// The queue publishes `task.created` carrying the trigger's
    /// correlation id.
    pub async fn handle_event(&self, event: &TriggerEvent) -> Result<Uuid, AdapterError> {
        if !self.mapping.matches(&event.event_type) {
            return Err(AdapterError::PatternMismatch {
                event_type: event.event_type.clone(),
                pattern: self.mapping.event_pattern.clone(),
            });
        }

        let task_name = event
            .payload
            .get(&self.mapping.task_name_field)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AdapterError::MissingTaskName(self.mapping.task_name_field.clone()))?
            .to_string();

        let payload = event
            .payload
            .get(&self.mapping.payload_field)
            .cloned()
            .unwrap_or_else(|| event.payload.clone());

        let priority = event
            .payload
            .get(&self.mapping.priority_field)
            .and_then(serde_json::Value::as_str)
            .and_then(TaskPriority::from_str)
            .unwrap_or(self.mapping.default_priority);

        let workflow_id = event
            .payload
            .get(&self.mapping.workflow_id_field)
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string);

        let timeout = event
            .payload
            .get(&self.mapping.timeout_field)
            .and_then(serde_json::Value::as_f64)
            .filter(|s| *s > 0.0)
            .map(Duration::from_secs_f64);

        let task_id = self
            .queue
            .enqueue_with(
                task_name.clone(),
                payload,
                EnqueueOptions {
                    priority,
                    timeout,
                    workflow_id,
                    trigger_event_id: Some(event.event_id),
                    ..EnqueueOptions::default()
                },
            )
            .await?;

        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            task_id = %task_id,
            task_name = %task_name,
            "event converted to task"
        );
        Ok(task_id)
    }

    /// Publish a `metrics.snapshot` event with current queue statistics
    /// and, when a pool is given, pool metrics.
    pub async fn publish_metrics_snapshot(&self, pool: Option<&WorkerPool>) {
        let queue_stats = self.queue.statistics().await;
        let pool_metrics = match pool {
            Some(pool) => Some(pool.metrics().await),
            None => None,
        };

        debug!("publishing metrics snapshot");
        self.bus.publish(EventPayload::MetricsSnapshot {
            queue: queue_stats,
            pool: pool_metrics,
            timestamp: Utc::now(),
        });
    }
}

impl std::fmt::Debug for EventTaskAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTaskAdapter")
            .field("mapping", &self.mapping)
            .finish_non_exhaustive()
    }
}
