//! Saga executor: ordered steps with reverse-order compensation.
//!
//! A saga approximates transactional semantics across non-transactional
//! resources: steps run in insertion order, and on the first step failure
//! the compensations of already-completed steps run in reverse order.

use chrono::Utc;
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::models::{SagaExecution, SagaState};

/// Value produced by a step and handed to its compensation.
pub type StepResult = serde_json::Value;

type ActionFn = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<StepResult>> + Send + Sync>;
type CompensationFn =
    Box<dyn Fn(StepResult) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Saga failure surfaced to the caller.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A compensation failed; remaining compensations were not attempted.
    #[error("compensation for step '{step}' failed: {source}")]
    CompensationFailed {
        step: String,
        #[source]
        source: anyhow::Error,
    },
}

/// One step of a saga: an action and an optional compensation.
pub struct SagaStep {
    pub name: String,
    action: ActionFn,
    compensation: Option<CompensationFn>,
}

impl SagaStep {
    fn new(name: impl Into<String>, action: ActionFn, compensation: Option<CompensationFn>) -> Self {
        Self {
            name: name.into(),
            action,
            compensation,
        }
    }

    pub fn has_compensation(&self) -> bool {
        self.compensation.is_some()
    }
}

impl std::fmt::Debug for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaStep")
            .field("name", &self.name)
            .field("has_compensation", &self.has_compensation())
            .finish()
    }
}

/// An ordered multi-step workflow with compensation on failure.
pub struct Saga {
    saga_id: String,
    steps: Vec<SagaStep>,
}

impl Saga {
    pub fn new(saga_id: impl Into<String>) -> Self {
        Self {
            saga_id: saga_id.into(),
            steps: Vec::new(),
        }
    }

    pub fn saga_id(&self) -> &str {
        &self.saga_id
    }

    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    /// Append a step without a compensation.
    pub fn add_step<A, AF>(&mut self, name: impl Into<String>, action: A)
    where
        A: Fn() -> AF + Send + Sync + 'static,
        AF: std::future::Future<Output = anyhow::Result<StepResult>> + Send + 'static,
    {
        self.steps.push(SagaStep::new(
            name,
            Box::new(move || Box::pin(action())),
            None,
        ));
    }

    /// Append a step with a compensation taking the step's result.
    pub fn add_step_with_compensation<A, AF, C, CF>(
        &mut self,
        name: impl Into<String>,
        action: A,
        compensation: C,
    ) where
        A: Fn() -> AF + Send + Sync + 'static,
        AF: std::future::Future<Output = anyhow::Result<StepResult>> + Send + 'static,
        C: Fn(StepResult) -> CF + Send + Sync + 'static,
        CF: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.steps.push(SagaStep::new(
            name,
            Box::new(move || Box::pin(action())),
            Some(Box::new(move |result| Box::pin(compensation(result)))),
        ));
    }

    /// Run the saga to a terminal state.
    ///
    /// - Every step succeeds → `Completed`.
    /// - Step `k` fails → compensations of steps `k-1 .. 0` run in that
    ///   order; missing compensations count as no-op successes. All
    ///   compensations succeeding → `Compensated`.
    /// - A compensation failure aborts the remaining compensations and
    ///   surfaces [`SagaError::CompensationFailed`]; the execution record
    ///   inside the error path is left in `Failed`.
    pub async fn execute(&self) -> Result<SagaExecution, SagaError> {
        let mut execution = SagaExecution::new(self.saga_id.clone(), self.steps.len());
        execution.state = SagaState::Running;
        execution.started_at = Some(Utc::now());

        info!(saga_id = %self.saga_id, steps = self.steps.len(), "saga started");

        let mut results: Vec<StepResult> = Vec::with_capacity(self.steps.len());
        let mut failure: Option<(usize, anyhow::Error)> = None;

        for (index, step) in self.steps.iter().enumerate() {
            debug!(saga_id = %self.saga_id, step = %step.name, "executing step");
            match (step.action)().await {
                Ok(result) => {
                    results.push(result);
                    execution.completed_steps += 1;
                }
                Err(err) => {
                    warn!(
                        saga_id = %self.saga_id,
                        step = %step.name,
                        error = %err,
                        "step failed, compensating"
                    );
                    failure = Some((index, err));
                    break;
                }
            }
        }

        let Some((failed_index, step_error)) = failure else {
            execution.state = SagaState::Completed;
            execution.completed_at = Some(Utc::now());
            info!(saga_id = %self.saga_id, "saga completed");
            return Ok(execution);
        };

        execution.state = SagaState::Compensating;
        execution.error = Some(format!(
            "step '{}' failed: {}",
            self.steps[failed_index].name, step_error
        ));

        // Unwind completed steps in reverse order.
        for index in (0..failed_index).rev() {
            let step = &self.steps[index];
            if let Some(compensation) = &step.compensation {
                debug!(saga_id = %self.saga_id, step = %step.name, "compensating step");
                if let Err(err) = compensation(results[index].clone()).await {
                    error!(
                        saga_id = %self.saga_id,
                        step = %step.name,
                        error = %err,
                        "compensation failed"
                    );
                    execution.state = SagaState::Failed;
                    execution.completed_at = Some(Utc::now());
                    return Err(SagaError::CompensationFailed {
                        step: step.name.clone(),
                        source: err,
                    });
                }
            }
            // Steps without a compensation unwind as no-ops.
            execution.compensated_steps += 1;
        }

        execution.state = SagaState::Compensated;
        execution.completed_at = Some(Utc::now());
        info!(
            saga_id = %self.saga_id,
            compensated = execution.compensated_steps,
            "saga compensated"
        );
        Ok(execution)
    }
}

impl std::fmt::Debug for Saga {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Saga")
            .field("saga_id", &self.saga_id)
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// Fluent builder for sagas.
pub struct SagaBuilder {
    saga: Saga,
}

impl SagaBuilder {
    pub fn new(saga_id: impl Into<String>) -> Self {
        Self {
            saga: Saga::new(saga_id),
        }
    }

    pub fn step<A, AF>(mut self, name: impl Into<String>, action: A) -> Self
    where
        A: Fn() -> AF + Send + Sync + 'static,
        AF: std::future::Future<Output = anyhow::Result<StepResult>> + Send + 'static,
    {
        self.saga.add_step(name, action);
        self
    }

    pub fn step_with_compensation<A, AF, C, CF>(
        mut self,
        name: impl Into<String>,
        action: A,
        compensation: C,
    ) -> Self
    where
        A: Fn() -> AF + Send + Sync + 'static,
        AF: std::future::Future<Output = anyhow::Result<StepResult>> + Send + 'static,
        C: Fn(StepResult) -> CF + Send + Sync + 'static,
        CF: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.saga.add_step_with_compensation(name, action, compensation);
        self
    }

    pub fn build(self) -> Saga {
        self.saga
    }
}
