//! Priority task queue with lifecycle tracking.
//!
//! Pending work is ordered strictly by (priority desc, created_at asc,
//! task id asc). Dequeue honors a cap on concurrently running tasks and
//! blocks until work is claimable, a new task arrives, or the running
//! count drops. One mutex guards the heap, the id-to-task map, and the
//! running count; handlers never run under it.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::event_bus::{EventBus, EventPayload};
use crate::domain::models::{
    QueueSettings, Task, TaskMetadata, TaskPriority, TaskState, EMA_ALPHA,
};

/// Task queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue '{queue}' is full (capacity {capacity})")]
    QueueFull { queue: String, capacity: usize },

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Task name cannot be empty")]
    EmptyTaskName,
}

/// Queue limits.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum tracked tasks; `None` means unbounded.
    pub max_capacity: Option<usize>,
    /// Maximum tasks in the running state at once.
    pub max_running: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_capacity: None,
            max_running: 10,
        }
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            max_capacity: settings.max_capacity,
            max_running: settings.max_running,
        }
    }
}

/// Optional fields for task submission.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: TaskPriority,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
    pub workflow_id: Option<String>,
    pub parent_task_id: Option<Uuid>,
    pub dependencies: HashSet<Uuid>,
    pub tags: HashMap<String, String>,
    /// Correlation id of the external event that triggered submission.
    pub trigger_event_id: Option<Uuid>,
}

impl EnqueueOptions {
    pub fn with_priority(priority: TaskPriority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }
}

/// Queue statistics: counts per state, pending counts per priority, and
/// a smoothed average of completed-task duration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub timeout_tasks: usize,
    /// Pending tasks per priority.
    pub tasks_by_priority: HashMap<TaskPriority, usize>,
    /// EMA of completed-task duration in seconds, `None` until the first
    /// completion.
    pub average_duration_seconds: Option<f64>,
}

/// Heap entry; `Ord` makes `BinaryHeap` pop the highest priority first,
/// oldest first within a priority, smallest id on exact ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingEntry {
    priority: TaskPriority,
    created_at: DateTime<Utc>,
    task_id: Uuid,
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: HashMap<Uuid, Task>,
    heap: BinaryHeap<PendingEntry>,
    running: usize,
    duration_ema_seconds: Option<f64>,
}

impl QueueState {
    /// Pop the best claimable pending task, lazily discarding entries for
    /// tasks that were cancelled or cleared since they were pushed.
    fn pop_pending(&mut self) -> Option<Uuid> {
        while let Some(entry) = self.heap.pop() {
            if self
                .tasks
                .get(&entry.task_id)
                .is_some_and(|t| t.metadata.state == TaskState::Pending)
            {
                return Some(entry.task_id);
            }
        }
        None
    }

    /// Claim the best pending task for a worker, transitioning it to
    /// running.
    fn claim(&mut self, worker_id: Option<&str>) -> Option<Task> {
        let task_id = self.pop_pending()?;
        let task = self.tasks.get_mut(&task_id)?;
        task.metadata.state = TaskState::Running;
        task.metadata.started_at = Some(Utc::now());
        task.metadata.agent_id = worker_id.map(ToString::to_string);
        self.running += 1;
        Some(task.clone())
    }

    fn fold_duration(&mut self, seconds: f64) {
        self.duration_ema_seconds = Some(match self.duration_ema_seconds {
            None => seconds,
            Some(ema) => EMA_ALPHA * seconds + (1.0 - EMA_ALPHA) * ema,
        });
    }
}

/// Bounded, priority-ordered store of runnable work.
pub struct TaskQueue {
    name: String,
    config: QueueConfig,
    state: Mutex<QueueState>,
    notify: Notify,
    event_bus: Option<Arc<EventBus>>,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            event_bus: None,
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, QueueConfig::default())
    }

    /// Attach a bus for lifecycle events.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn publish(&self, payload: EventPayload) {
        if let Some(bus) = &self.event_bus {
            bus.publish(payload);
        }
    }

    /// Submit a task with default options.
    pub async fn enqueue(
        &self,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Uuid, QueueError> {
        self.enqueue_with(name, payload, EnqueueOptions::default())
            .await
    }

    /// Submit a task.
    ///
    /// Fails with [`QueueError::QueueFull`] once `max_capacity` tasks are
    /// tracked, and rejects empty names.
    pub async fn enqueue_with(
        &self,
        name: impl Into<String>,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<Uuid, QueueError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(QueueError::EmptyTaskName);
        }

        let mut metadata = TaskMetadata::new(name, options.priority);
        if let Some(max_retries) = options.max_retries {
            metadata.max_retries = max_retries;
        }
        metadata.timeout = options.timeout;
        metadata.workflow_id = options.workflow_id;
        metadata.parent_task_id = options.parent_task_id;
        metadata.dependencies = options.dependencies;
        metadata.tags = options.tags;

        let task = Task::new(metadata, payload);
        let task_id = task.id();

        {
            let mut state = self.state.lock().await;
            if let Some(capacity) = self.config.max_capacity {
                if state.tasks.len() >= capacity {
                    warn!(queue = %self.name, capacity, "enqueue rejected, queue full");
                    return Err(QueueError::QueueFull {
                        queue: self.name.clone(),
                        capacity,
                    });
                }
            }

            state.heap.push(PendingEntry {
                priority: task.metadata.priority,
                created_at: task.metadata.created_at,
                task_id,
            });
            state.tasks.insert(task_id, task.clone());
        }

        debug!(
            queue = %self.name,
            task_id = %task_id,
            name = %task.metadata.name,
            priority = task.metadata.priority.as_str(),
            "task enqueued"
        );
        self.publish(EventPayload::TaskCreated {
            task_id,
            name: task.metadata.name.clone(),
            priority: task.metadata.priority,
            workflow_id: task.metadata.workflow_id.clone(),
            trigger_event_id: options.trigger_event_id,
            created_at: task.metadata.created_at,
        });
        self.notify.notify_waiters();

        Ok(task_id)
    }

    /// Claim the best pending task, blocking until one is claimable.
    ///
    /// Respects `max_running`: when the cap is met, the call waits even
    /// if work is pending. Returns `None` once `timeout` elapses without
    /// a claim; with no timeout the call waits indefinitely.
    pub async fn dequeue(&self, timeout: Option<Duration>) -> Option<Task> {
        self.dequeue_inner(None, timeout).await
    }

    /// [`dequeue`](Self::dequeue), recording the claiming worker in the
    /// task's `agent_id`.
    pub async fn dequeue_as(&self, worker_id: &str, timeout: Option<Duration>) -> Option<Task> {
        self.dequeue_inner(Some(worker_id), timeout).await
    }

    async fn dequeue_inner(&self, worker_id: Option<&str>, timeout: Option<Duration>) -> Option<Task> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            let mut notified = pin!(self.notify.notified());
            {
                let mut state = self.state.lock().await;
                if state.running < self.config.max_running {
                    if let Some(task) = state.claim(worker_id) {
                        drop(state);

                        debug!(queue = %self.name, task_id = %task.id(), "task dequeued");
                        self.publish(EventPayload::TaskStarted {
                            task_id: task.id(),
                            name: task.metadata.name.clone(),
                            worker_id: task.metadata.agent_id.clone(),
                            workflow_id: task.metadata.workflow_id.clone(),
                            started_at: task.metadata.started_at.unwrap_or_else(Utc::now),
                        });
                        return Some(task);
                    }
                }
                // Register for wakeups before releasing the lock so a
                // notify between unlock and await is not lost.
                notified.as_mut().enable();
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return None;
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Mark a running task completed.
    ///
    /// Returns `false` (without transitioning) when the task is not in
    /// the running state, e.g. it was cancelled mid-flight.
    pub async fn complete(
        &self,
        task_id: Uuid,
        result: Option<serde_json::Value>,
    ) -> Result<bool, QueueError> {
        let event = {
            let mut state = self.state.lock().await;
            let task = state
                .tasks
                .get_mut(&task_id)
                .ok_or(QueueError::TaskNotFound(task_id))?;

            if task.metadata.state != TaskState::Running {
                return Ok(false);
            }

            let now = Utc::now();
            task.metadata.state = TaskState::Completed;
            task.metadata.completed_at = Some(now);
            task.result = result.clone();

            let duration_ms = task
                .metadata
                .duration()
                .and_then(|d| d.num_microseconds())
                .map(|us| us as f64 / 1000.0);
            let event = EventPayload::TaskCompleted {
                task_id,
                name: task.metadata.name.clone(),
                workflow_id: task.metadata.workflow_id.clone(),
                result,
                duration_ms,
                completed_at: now,
            };

            if let Some(ms) = duration_ms {
                state.fold_duration(ms / 1000.0);
            }
            state.running = state.running.saturating_sub(1);
            event
        };

        debug!(queue = %self.name, task_id = %task_id, "task completed");
        self.publish(event);
        self.notify.notify_waiters();
        Ok(true)
    }

    /// Mark a running task failed, capturing the proximate error.
    pub async fn fail(&self, task_id: Uuid, error: impl Into<String>) -> Result<bool, QueueError> {
        self.finish_with_error(task_id, error.into(), TaskState::Failed)
            .await
    }

    /// Mark a running task timed out.
    pub async fn timeout_task(
        &self,
        task_id: Uuid,
        error: impl Into<String>,
    ) -> Result<bool, QueueError> {
        self.finish_with_error(task_id, error.into(), TaskState::Timeout)
            .await
    }

    async fn finish_with_error(
        &self,
        task_id: Uuid,
        error: String,
        terminal: TaskState,
    ) -> Result<bool, QueueError> {
        debug_assert!(matches!(terminal, TaskState::Failed | TaskState::Timeout));

        let event = {
            let mut state = self.state.lock().await;
            let task = state
                .tasks
                .get_mut(&task_id)
                .ok_or(QueueError::TaskNotFound(task_id))?;

            if task.metadata.state != TaskState::Running {
                return Ok(false);
            }

            let now = Utc::now();
            task.metadata.state = terminal;
            task.metadata.completed_at = Some(now);
            task.error = Some(error.clone());

            let event = if terminal == TaskState::Failed {
                EventPayload::TaskFailed {
                    task_id,
                    name: task.metadata.name.clone(),
                    workflow_id: task.metadata.workflow_id.clone(),
                    error: error.clone(),
                    retry_count: task.metadata.retry_count,
                    failed_at: now,
                }
            } else {
                EventPayload::TaskTimeout {
                    task_id,
                    name: task.metadata.name.clone(),
                    reason: error.clone(),
                }
            };

            state.running = state.running.saturating_sub(1);
            event
        };

        warn!(
            queue = %self.name,
            task_id = %task_id,
            state = terminal.as_str(),
            error = %error,
            "task finished with error"
        );
        self.publish(event);
        self.notify.notify_waiters();
        Ok(true)
    }

    /// Cancel a pending or running task.
    ///
    /// A no-op returning `false` on terminal states.
    pub async fn cancel(&self, task_id: Uuid) -> Result<bool, QueueError> {
        let event = {
            let mut state = self.state.lock().await;
            let task = state
                .tasks
                .get_mut(&task_id)
                .ok_or(QueueError::TaskNotFound(task_id))?;

            if task.metadata.state.is_terminal() {
                return Ok(false);
            }

            let was_running = task.metadata.state == TaskState::Running;
            task.metadata.state = TaskState::Cancelled;
            task.metadata.completed_at = Some(Utc::now());
            let event = EventPayload::TaskCancelled {
                task_id,
                name: task.metadata.name.clone(),
                reason: "cancelled by caller".to_string(),
            };

            if was_running {
                state.running = state.running.saturating_sub(1);
            }
            event
        };

        info!(queue = %self.name, task_id = %task_id, "task cancelled");
        self.publish(event);
        self.notify.notify_waiters();
        Ok(true)
    }

    /// Fetch a task by id.
    pub async fn get(&self, task_id: Uuid) -> Result<Task, QueueError> {
        let state = self.state.lock().await;
        state
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(QueueError::TaskNotFound(task_id))
    }

    /// All tasks belonging to a workflow.
    pub async fn list_by_workflow(&self, workflow_id: &str) -> Vec<Task> {
        let state = self.state.lock().await;
        state
            .tasks
            .values()
            .filter(|t| t.metadata.workflow_id.as_deref() == Some(workflow_id))
            .cloned()
            .collect()
    }

    /// All tasks in a given state.
    pub async fn list_by_state(&self, task_state: TaskState) -> Vec<Task> {
        let state = self.state.lock().await;
        state
            .tasks
            .values()
            .filter(|t| t.metadata.state == task_state)
            .cloned()
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .tasks
            .values()
            .filter(|t| t.metadata.state == TaskState::Pending)
            .count()
    }

    pub async fn running_count(&self) -> usize {
        self.state.lock().await.running
    }

    /// Total tracked tasks in any state.
    pub async fn len(&self) -> usize {
        self.state.lock().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Counts per state and per priority plus the duration EMA.
    pub async fn statistics(&self) -> TaskStatistics {
        let state = self.state.lock().await;
        let mut stats = TaskStatistics {
            total_tasks: state.tasks.len(),
            average_duration_seconds: state.duration_ema_seconds,
            ..TaskStatistics::default()
        };

        for task in state.tasks.values() {
            match task.metadata.state {
                TaskState::Pending => {
                    stats.pending_tasks += 1;
                    *stats
                        .tasks_by_priority
                        .entry(task.metadata.priority)
                        .or_insert(0) += 1;
                }
                TaskState::Running => stats.running_tasks += 1,
                TaskState::Completed => stats.completed_tasks += 1,
                TaskState::Failed => stats.failed_tasks += 1,
                TaskState::Cancelled => stats.cancelled_tasks += 1,
                TaskState::Timeout => stats.timeout_tasks += 1,
            }
        }
        stats
    }

    /// Drop every tracked task.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.tasks.clear();
        state.heap.clear();
        state.running = 0;
        state.duration_ema_seconds = None;
        info!(queue = %self.name, "queue cleared");
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
