//! Application services for the orchestration core.

pub mod circuit_breaker;
pub mod dependency_resolver;
pub mod event_adapter;
pub mod event_bus;
pub mod execution_plan;
pub mod health_monitor;
pub mod load_balancer;
pub mod retry;
pub mod saga;
pub mod service_registry;
pub mod task_queue;
pub mod worker_pool;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitConfigError, CircuitError, CircuitMetrics,
    CircuitState,
};
pub use dependency_resolver::{DependencyGraph, GraphError, GraphStats, TaskNode};
pub use event_adapter::{AdapterError, EventTaskAdapter, EventToTaskMapping, TriggerEvent};
pub use event_bus::{EventBus, EventBusConfig, EventId, EventPayload, OrchestrationEvent};
pub use execution_plan::{ExecutionLevel, ExecutionPlan};
pub use health_monitor::{HealthMonitor, HealthMonitorConfig};
pub use load_balancer::{
    BalancerError, BalancerMetrics, LoadBalancer, LoadBalancerConfig, LoadBalancingStrategy,
    SelectionResult,
};
pub use retry::{
    RetryConfig, RetryConfigError, RetryContext, RetryError, RetryPolicy, RetryStrategy,
};
pub use saga::{Saga, SagaBuilder, SagaError, SagaStep, StepResult};
pub use service_registry::{RegisterRequest, RegistryConfig, RegistryError, ServiceRegistry};
pub use task_queue::{EnqueueOptions, QueueConfig, QueueError, TaskQueue, TaskStatistics};
pub use worker_pool::{
    PoolError, WorkerMetrics, WorkerPool, WorkerPoolConfig, WorkerPoolMetrics, WorkerState,
};
