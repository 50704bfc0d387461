//! Domain ports (interfaces) for the orchestration core.

pub mod health_probe;
pub mod task_handler;

pub use health_probe::{FnProbe, HealthProbe};
pub use task_handler::{HandlerRegistry, TaskHandler};
