//! Hivemind - Agent Orchestration Core
//!
//! A library-shaped runtime for multi-agent platforms:
//! - Priority task queue with lifecycle tracking and bounded concurrency
//! - DAG dependency resolution and level-based execution planning
//! - Worker pool with dynamic scaling and per-task deadlines
//! - Retry policies and saga (compensation) execution
//! - Agent service registry with TTL expiry
//! - Health monitoring, load balancing, and circuit breaking

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::models::{
    AgentCapability, AgentRegistration, AgentStatus, Task, TaskMetadata, TaskPriority, TaskState,
};
pub use domain::ports::{HandlerRegistry, TaskHandler};
pub use services::{
    CircuitBreaker, DependencyGraph, EventBus, HealthMonitor, LoadBalancer, RetryPolicy, Saga,
    ServiceRegistry, TaskQueue, WorkerPool,
};
