//! Task domain model.
//!
//! Tasks are discrete units of work pulled from the queue by workers.
//! A task references its handler by name; the handler itself lives in a
//! [`HandlerRegistry`](crate::domain::ports::HandlerRegistry).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority level for tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Queued, waiting for a worker.
    Pending,
    /// Claimed by a worker, handler executing.
    Running,
    /// Handler returned normally.
    Completed,
    /// Handler returned an error.
    Failed,
    /// Cancelled before reaching a terminal state.
    Cancelled,
    /// Handler exceeded its execution deadline.
    Timeout,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }
}

/// Metadata describing a task's identity, placement, and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Stable unique identifier.
    pub task_id: Uuid,
    /// Non-unique label; also the handler lookup key.
    pub name: String,
    pub priority: TaskPriority,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    /// Set when the task first transitions to running.
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the task reaches a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Per-task execution deadline. Overrides the pool-level deadline.
    pub timeout: Option<std::time::Duration>,
    pub workflow_id: Option<String>,
    pub parent_task_id: Option<Uuid>,
    /// Ids of tasks that must complete before this one may run.
    pub dependencies: HashSet<Uuid>,
    pub tags: HashMap<String, String>,
    /// The worker or agent that claimed the task.
    pub agent_id: Option<String>,
}

impl TaskMetadata {
    /// Create metadata for a freshly submitted task.
    pub fn new(name: impl Into<String>, priority: TaskPriority) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            name: name.into(),
            priority,
            state: TaskState::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: 3,
            timeout: None,
            workflow_id: None,
            parent_task_id: None,
            dependencies: HashSet::new(),
            tags: HashMap::new(),
            agent_id: None,
        }
    }

    /// Wall-clock duration, defined only once the task has both started
    /// and reached a terminal state.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// A unit of work: metadata plus an opaque payload and outcome fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub metadata: TaskMetadata,
    /// Arbitrary input handed to the handler.
    pub payload: serde_json::Value,
    /// Output of a completed handler.
    pub result: Option<serde_json::Value>,
    /// Proximate error of a failed or timed-out run.
    pub error: Option<String>,
}

impl Task {
    pub fn new(metadata: TaskMetadata, payload: serde_json::Value) -> Self {
        Self {
            metadata,
            payload,
            result: None,
            error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.metadata.task_id
    }
}
