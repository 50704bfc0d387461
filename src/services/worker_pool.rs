//! Worker pool for parallel task execution.
//!
//! Workers pull tasks from the queue, dispatch them through the handler
//! registry, and report completion, failure, or timeout back to the
//! queue. The pool scales between `min_workers` and `max_workers`;
//! scale-down only ever stops idle workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::task_queue::TaskQueue;
use crate::domain::models::{Task, WorkerPoolSettings};
use crate::domain::ports::HandlerRegistry;

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Ready to accept work.
    Idle,
    /// Executing a task.
    Busy,
    /// Shut down.
    Stopped,
    /// Recovering from an unexpected error.
    Error,
}

/// Worker pool errors.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker pool at max capacity ({0})")]
    PoolFull(usize),

    #[error("Worker pool not started")]
    NotStarted,

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Pool-wide per-task deadline; a task-level timeout overrides it.
    pub max_execution_time: Option<Duration>,
    /// Idle time after an unexpected worker error before resuming.
    pub error_cooldown: Duration,
    /// Grace given to in-flight handlers during shutdown before their
    /// futures are aborted.
    pub drain_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 10,
            max_execution_time: None,
            error_cooldown: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl WorkerPoolConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.min_workers < 1 {
            return Err(PoolError::InvalidConfig(
                "min_workers must be at least 1".to_string(),
            ));
        }
        if self.max_workers < self.min_workers {
            return Err(PoolError::InvalidConfig(
                "max_workers must be >= min_workers".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<&WorkerPoolSettings> for WorkerPoolConfig {
    fn from(settings: &WorkerPoolSettings) -> Self {
        Self {
            min_workers: settings.min_workers,
            max_workers: settings.max_workers,
            max_execution_time: settings
                .max_execution_time_seconds
                .map(Duration::from_secs_f64),
            error_cooldown: Duration::from_millis(settings.error_cooldown_ms),
            drain_timeout: Duration::from_secs_f64(settings.drain_timeout_seconds),
        }
    }
}

/// Performance metrics for one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerMetrics {
    pub worker_id: String,
    pub state: WorkerState,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_execution_time_seconds: f64,
    pub current_task_id: Option<Uuid>,
    pub current_task_started_at: Option<DateTime<Utc>>,
    pub last_active: DateTime<Utc>,
    pub error: Option<String>,
}

impl WorkerMetrics {
    fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            state: WorkerState::Idle,
            tasks_completed: 0,
            tasks_failed: 0,
            total_execution_time_seconds: 0.0,
            current_task_id: None,
            current_task_started_at: None,
            last_active: Utc::now(),
            error: None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn average_execution_time_seconds(&self) -> f64 {
        if self.tasks_completed == 0 {
            return 0.0;
        }
        self.total_execution_time_seconds / self.tasks_completed as f64
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let total = self.tasks_completed + self.tasks_failed;
        if total == 0 {
            return 1.0;
        }
        self.tasks_completed as f64 / total as f64
    }
}

/// Aggregate metrics for the pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerPoolMetrics {
    pub total_workers: usize,
    pub idle_workers: usize,
    pub busy_workers: usize,
    pub stopped_workers: usize,
    pub total_tasks_completed: u64,
    pub total_tasks_failed: u64,
    pub average_execution_time_seconds: f64,
    /// Fraction of workers currently busy.
    pub pool_utilization: f64,
}

struct Worker {
    worker_id: String,
    queue: Arc<TaskQueue>,
    handlers: Arc<HandlerRegistry>,
    metrics: Arc<RwLock<WorkerMetrics>>,
    stop: Arc<AtomicBool>,
    max_execution_time: Option<Duration>,
    error_cooldown: Duration,
}

impl Worker {
    /// Pull-execute loop. Task failures are recorded against the task,
    /// never propagated; only unexpected queue errors put the worker into
    /// the error state, and it recovers after a cooldown.
    async fn run(self) {
        info!(worker_id = %self.worker_id, "worker started");

        while !self.stop.load(Ordering::SeqCst) {
            let task = self
                .queue
                .dequeue_as(&self.worker_id, Some(Duration::from_secs(1)))
                .await;

            let Some(task) = task else {
                continue;
            };

            if let Err(err) = self.execute_task(task).await {
                error!(worker_id = %self.worker_id, error = %err, "worker error");
                {
                    let mut metrics = self.metrics.write().await;
                    metrics.state = WorkerState::Error;
                    metrics.error = Some(err.to_string());
                }
                tokio::time::sleep(self.error_cooldown).await;
                let mut metrics = self.metrics.write().await;
                metrics.state = WorkerState::Idle;
            }
        }

        let mut metrics = self.metrics.write().await;
        metrics.state = WorkerState::Stopped;
        info!(worker_id = %self.worker_id, "worker stopped");
    }

    async fn execute_task(&self, task: Task) -> anyhow::Result<()> {
        let task_id = task.id();
        let task_name = task.metadata.name.clone();
        // Most-specific deadline wins.
        let deadline = task.metadata.timeout.or(self.max_execution_time);

        {
            let mut metrics = self.metrics.write().await;
            metrics.state = WorkerState::Busy;
            metrics.current_task_id = Some(task_id);
            metrics.current_task_started_at = Some(Utc::now());
            metrics.last_active = Utc::now();
        }

        debug!(
            worker_id = %self.worker_id,
            task_id = %task_id,
            task_name = %task_name,
            "task execution started"
        );
        let start = Instant::now();

        let outcome = match self.handlers.get(&task_name).await {
            Some(handler) => {
                let invocation = handler.handle(task.payload.clone());
                match deadline {
                    Some(limit) => match tokio::time::timeout(limit, invocation).await {
                        Ok(result) => Outcome::Finished(result),
                        Err(_) => Outcome::DeadlineExceeded(limit),
                    },
                    None => Outcome::Finished(invocation.await),
                }
            }
            // No handler registered for this task name: complete as-is.
            None => Outcome::Finished(Ok(serde_json::Value::Null)),
        };

        let elapsed = start.elapsed();
        let report = match outcome {
            Outcome::Finished(Ok(result)) => {
                self.queue.complete(task_id, Some(result)).await?;
                let mut metrics = self.metrics.write().await;
                metrics.tasks_completed += 1;
                metrics.total_execution_time_seconds += elapsed.as_secs_f64();
                debug!(
                    worker_id = %self.worker_id,
                    task_id = %task_id,
                    execution_time_ms = elapsed.as_millis() as u64,
                    "task execution completed"
                );
                Ok(())
            }
            Outcome::Finished(Err(handler_error)) => {
                self.queue
                    .fail(task_id, format!("Task execution error: {handler_error}"))
                    .await?;
                let mut metrics = self.metrics.write().await;
                metrics.tasks_failed += 1;
                warn!(
                    worker_id = %self.worker_id,
                    task_id = %task_id,
                    error = %handler_error,
                    "task execution failed"
                );
                Ok(())
            }
            Outcome::DeadlineExceeded(limit) => {
                self.queue
                    .timeout_task(
                        task_id,
                        format!("Task exceeded max execution time ({:.1}s)", limit.as_secs_f64()),
                    )
                    .await?;
                let mut metrics = self.metrics.write().await;
                metrics.tasks_failed += 1;
                warn!(
                    worker_id = %self.worker_id,
                    task_id = %task_id,
                    limit_ms = limit.as_millis() as u64,
                    "task execution timed out"
                );
                Ok(())
            }
        };

        let mut metrics = self.metrics.write().await;
        metrics.state = WorkerState::Idle;
        metrics.current_task_id = None;
        metrics.current_task_started_at = None;
        metrics.last_active = Utc::now();
        drop(metrics);

        report
    }
}

enum Outcome {
    Finished(anyhow::Result<serde_json::Value>),
    DeadlineExceeded(Duration),
}

struct WorkerHandle {
    metrics: Arc<RwLock<WorkerMetrics>>,
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Pool of workers draining a shared task queue.
pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    handlers: Arc<HandlerRegistry>,
    config: WorkerPoolConfig,
    workers: RwLock<HashMap<String, WorkerHandle>>,
    started: AtomicBool,
}

impl WorkerPool {
    /// Create a pool. Fails on invalid sizing.
    pub fn new(
        queue: Arc<TaskQueue>,
        handlers: Arc<HandlerRegistry>,
        config: WorkerPoolConfig,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            queue,
            handlers,
            config,
            workers: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Start the pool with `min_workers` workers. Idempotent.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            "worker pool starting"
        );
        for _ in 0..self.config.min_workers {
            self.spawn_worker().await;
        }
    }

    /// Stop every worker. In-flight handlers get `drain_timeout` to
    /// finish before their futures are aborted. Idempotent.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut workers = self.workers.write().await;
        info!(active_workers = workers.len(), "worker pool stopping");

        for handle in workers.values() {
            handle.stop.store(true, Ordering::SeqCst);
        }

        for (worker_id, handle) in workers.drain() {
            let mut join = handle.join;
            if tokio::time::timeout(self.config.drain_timeout, &mut join)
                .await
                .is_err()
            {
                warn!(worker_id = %worker_id, "worker did not drain in time, aborting");
                join.abort();
            }
        }
        info!("worker pool stopped");
    }

    /// Add up to `count` workers.
    ///
    /// Returns how many were added; fails with [`PoolError::PoolFull`]
    /// when the cap is hit.
    pub async fn scale_up(&self, count: usize) -> Result<usize, PoolError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(PoolError::NotStarted);
        }

        let mut added = 0;
        for _ in 0..count {
            {
                let workers = self.workers.read().await;
                if workers.len() >= self.config.max_workers {
                    return Err(PoolError::PoolFull(self.config.max_workers));
                }
            }
            self.spawn_worker().await;
            added += 1;
        }

        info!(added, "worker pool scaled up");
        Ok(added)
    }

    /// Signal up to `count` idle workers to stop, never dropping below
    /// `min_workers`. Busy workers are not preempted. Returns how many
    /// workers were stopped.
    pub async fn scale_down(&self, count: usize) -> Result<usize, PoolError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(PoolError::NotStarted);
        }

        let mut victims = Vec::new();
        {
            let workers = self.workers.read().await;
            let removable = workers.len().saturating_sub(self.config.min_workers);
            for (worker_id, handle) in workers.iter() {
                if victims.len() >= count.min(removable) {
                    break;
                }
                if handle.metrics.read().await.state == WorkerState::Idle {
                    victims.push(worker_id.clone());
                }
            }
        }

        if victims.is_empty() {
            return Ok(0);
        }

        let mut workers = self.workers.write().await;
        let mut removed = 0;
        for worker_id in victims {
            if let Some(handle) = workers.remove(&worker_id) {
                handle.stop.store(true, Ordering::SeqCst);
                let mut join = handle.join;
                if tokio::time::timeout(self.config.drain_timeout, &mut join)
                    .await
                    .is_err()
                {
                    warn!(worker_id = %worker_id, "worker did not stop in time, aborting");
                    join.abort();
                }
                removed += 1;
            }
        }
        drop(workers);

        info!(removed, "worker pool scaled down");
        Ok(removed)
    }

    /// Aggregate pool metrics.
    pub async fn metrics(&self) -> WorkerPoolMetrics {
        let workers = self.workers.read().await;
        let mut pool = WorkerPoolMetrics {
            total_workers: workers.len(),
            ..WorkerPoolMetrics::default()
        };

        let mut total_execution_time = 0.0;
        for handle in workers.values() {
            let metrics = handle.metrics.read().await;
            match metrics.state {
                WorkerState::Idle | WorkerState::Error => pool.idle_workers += 1,
                WorkerState::Busy => pool.busy_workers += 1,
                WorkerState::Stopped => pool.stopped_workers += 1,
            }
            pool.total_tasks_completed += metrics.tasks_completed;
            pool.total_tasks_failed += metrics.tasks_failed;
            total_execution_time += metrics.total_execution_time_seconds;
        }

        #[allow(clippy::cast_precision_loss)]
        if pool.total_tasks_completed > 0 {
            pool.average_execution_time_seconds =
                total_execution_time / pool.total_tasks_completed as f64;
        }
        #[allow(clippy::cast_precision_loss)]
        if pool.total_workers > 0 {
            pool.pool_utilization = pool.busy_workers as f64 / pool.total_workers as f64;
        }
        pool
    }

    /// Metrics for one worker.
    pub async fn worker_metrics(&self, worker_id: &str) -> Result<WorkerMetrics, PoolError> {
        let workers = self.workers.read().await;
        match workers.get(worker_id) {
            Some(handle) => Ok(handle.metrics.read().await.clone()),
            None => Err(PoolError::WorkerNotFound(worker_id.to_string())),
        }
    }

    pub async fn worker_ids(&self) -> Vec<String> {
        self.workers.read().await.keys().cloned().collect()
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    async fn spawn_worker(&self) -> String {
        let worker_id = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let metrics = Arc::new(RwLock::new(WorkerMetrics::new(worker_id.clone())));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            worker_id: worker_id.clone(),
            queue: Arc::clone(&self.queue),
            handlers: Arc::clone(&self.handlers),
            metrics: Arc::clone(&metrics),
            stop: Arc::clone(&stop),
            max_execution_time: self.config.max_execution_time,
            error_cooldown: self.config.error_cooldown,
        };
        let join = tokio::spawn(worker.run());

        let mut workers = self.workers.write().await;
        workers.insert(worker_id.clone(), WorkerHandle { metrics, stop, join });
        drop(workers);

        debug!(worker_id = %worker_id, "worker spawned");
        worker_id
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn pool_with(
        config: WorkerPoolConfig,
    ) -> (Arc<TaskQueue>, Arc<HandlerRegistry>, WorkerPool) {
        let queue = Arc::new(TaskQueue::with_defaults("pool-test"));
        let handlers = Arc::new(HandlerRegistry::new());
        let pool = WorkerPool::new(Arc::clone(&queue), Arc::clone(&handlers), config).unwrap();
        (queue, handlers, pool)
    }

    #[test]
    fn test_config_validation() {
        assert!(WorkerPoolConfig {
            min_workers: 0,
            ..WorkerPoolConfig::default()
        }
        .validate()
        .is_err());

        assert!(WorkerPoolConfig {
            min_workers: 5,
            max_workers: 2,
            ..WorkerPoolConfig::default()
        }
        .validate()
        .is_err());
    }

    #[tokio::test]
    async fn test_start_spawns_min_workers() {
        let (_, _, pool) = pool_with(WorkerPoolConfig {
            min_workers: 3,
            max_workers: 5,
            ..WorkerPoolConfig::default()
        })
        .await;

        pool.start().await;
        assert_eq!(pool.worker_count().await, 3);
        // Idempotent.
        pool.start().await;
        assert_eq!(pool.worker_count().await, 3);

        pool.stop().await;
        assert_eq!(pool.worker_count().await, 0);
    }

    #[tokio::test]
    async fn test_workers_execute_tasks() {
        let (queue, handlers, pool) = pool_with(WorkerPoolConfig::default()).await;
        handlers
            .register_fn("double", |payload| {
                Box::pin(async move {
                    let n = payload["n"].as_i64().unwrap_or(0);
                    Ok(json!(n * 2))
                })
            })
            .await;

        pool.start().await;
        let task_id = queue.enqueue("double", json!({"n": 21})).await.unwrap();

        // Wait for the worker to drain the task.
        for _ in 0..50 {
            if queue.get(task_id).await.unwrap().metadata.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let task = queue.get(task_id).await.unwrap();
        assert_eq!(task.metadata.state, crate::domain::models::TaskState::Completed);
        assert_eq!(task.result, Some(json!(42)));

        let metrics = pool.metrics().await;
        assert_eq!(metrics.total_tasks_completed, 1);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_handler_failure_marks_task_failed() {
        let (queue, handlers, pool) = pool_with(WorkerPoolConfig::default()).await;
        handlers
            .register_fn("explode", |_| {
                Box::pin(async { anyhow::bail!("kaboom") })
            })
            .await;

        pool.start().await;
        let task_id = queue.enqueue("explode", json!(null)).await.unwrap();

        for _ in 0..50 {
            if queue.get(task_id).await.unwrap().metadata.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let task = queue.get(task_id).await.unwrap();
        assert_eq!(task.metadata.state, crate::domain::models::TaskState::Failed);
        assert!(task.error.as_deref().unwrap().contains("kaboom"));

        let metrics = pool.metrics().await;
        assert_eq!(metrics.total_tasks_failed, 1);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_task_timeout() {
        let (queue, handlers, pool) = pool_with(WorkerPoolConfig {
            max_execution_time: Some(Duration::from_millis(50)),
            ..WorkerPoolConfig::default()
        })
        .await;
        handlers
            .register_fn("sleepy", |_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(json!(null))
                })
            })
            .await;

        pool.start().await;
        let task_id = queue.enqueue("sleepy", json!(null)).await.unwrap();

        for _ in 0..100 {
            if queue.get(task_id).await.unwrap().metadata.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let task = queue.get(task_id).await.unwrap();
        assert_eq!(task.metadata.state, crate::domain::models::TaskState::Timeout);
        assert!(task.error.as_deref().unwrap().contains("max execution time"));
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_unhandled_task_completes() {
        let (queue, _, pool) = pool_with(WorkerPoolConfig::default()).await;
        pool.start().await;

        let task_id = queue.enqueue("no-such-handler", json!(null)).await.unwrap();
        for _ in 0..50 {
            if queue.get(task_id).await.unwrap().metadata.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(
            queue.get(task_id).await.unwrap().metadata.state,
            crate::domain::models::TaskState::Completed
        );
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_scale_up_respects_cap() {
        let (_, _, pool) = pool_with(WorkerPoolConfig {
            min_workers: 1,
            max_workers: 3,
            ..WorkerPoolConfig::default()
        })
        .await;

        assert!(matches!(pool.scale_up(1).await, Err(PoolError::NotStarted)));

        pool.start().await;
        assert_eq!(pool.scale_up(2).await.unwrap(), 2);
        assert_eq!(pool.worker_count().await, 3);
        assert!(matches!(pool.scale_up(1).await, Err(PoolError::PoolFull(3))));
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_scale_down_keeps_minimum() {
        let (_, _, pool) = pool_with(WorkerPoolConfig {
            min_workers: 2,
            max_workers: 6,
            ..WorkerPoolConfig::default()
        })
        .await;

        pool.start().await;
        pool.scale_up(3).await.unwrap();
        assert_eq!(pool.worker_count().await, 5);

        // Workers are idle; can only shed down to min_workers.
        let removed = pool.scale_down(10).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(pool.worker_count().await, 2);

        assert_eq!(pool.scale_down(1).await.unwrap(), 0);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_worker_metrics_lookup() {
        let (_, _, pool) = pool_with(WorkerPoolConfig::default()).await;
        pool.start().await;

        let ids = pool.worker_ids().await;
        assert_eq!(ids.len(), 1);
        let metrics = pool.worker_metrics(&ids[0]).await.unwrap();
        assert_eq!(metrics.worker_id, ids[0]);

        assert!(matches!(
            pool.worker_metrics("worker-missing").await,
            Err(PoolError::WorkerNotFound(_))
        ));
        pool.stop().await;
    }

    #[test]
    fn test_worker_metrics_derived_values() {
        let mut metrics = WorkerMetrics::new("worker-1");
        assert!((metrics.success_rate() - 1.0).abs() < f64::EPSILON);
        assert!((metrics.average_execution_time_seconds() - 0.0).abs() < f64::EPSILON);

        metrics.tasks_completed = 3;
        metrics.tasks_failed = 1;
        metrics.total_execution_time_seconds = 6.0;
        assert!((metrics.success_rate() - 0.75).abs() < f64::EPSILON);
        assert!((metrics.average_execution_time_seconds() - 2.0).abs() < f64::EPSILON);
    }
}
