//! Saga execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a saga run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    Pending,
    Running,
    /// Every step succeeded.
    Completed,
    /// A step failed; compensations are running in reverse order.
    Compensating,
    /// All compensations for completed steps succeeded.
    Compensated,
    /// A compensation itself failed.
    Failed,
}

impl SagaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Compensated | Self::Failed)
    }
}

/// Record of one saga execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaExecution {
    pub saga_id: String,
    pub state: SagaState,
    pub total_steps: usize,
    /// Steps that returned successfully before any failure.
    pub completed_steps: usize,
    /// Compensations that ran (missing handlers count as no-op successes).
    pub compensated_steps: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// The step error that triggered compensation, if any.
    pub error: Option<String>,
}

impl SagaExecution {
    pub fn new(saga_id: impl Into<String>, total_steps: usize) -> Self {
        Self {
            saga_id: saga_id.into(),
            state: SagaState::Pending,
            total_steps,
            completed_steps: 0,
            compensated_steps: 0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Wall-clock duration of the run in seconds, when finished.
    pub fn total_execution_time(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => {
                let micros = (end - start).num_microseconds()?;
                #[allow(clippy::cast_precision_loss)]
                Some(micros as f64 / 1_000_000.0)
            }
            _ => None,
        }
    }
}
