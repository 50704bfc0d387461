//! Retry policy with configurable backoff strategies.
//!
//! Computes delays, decides retry eligibility, and drives retry loops for
//! fallible async operations. Delay = strategy(base, attempt), capped at
//! `max_delay`, then jittered multiplicatively by a uniform factor in
//! `[1 - jitter, 1 + jitter]`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::models::RetrySettings;

/// Backoff strategy for computing retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// `base` every time.
    Fixed,
    /// `base * (attempt + 1)`.
    Linear,
    /// `base * exponential_base ^ attempt`.
    Exponential,
}

impl RetryStrategy {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fixed" => Some(Self::Fixed),
            "linear" => Some(Self::Linear),
            "exponential" => Some(Self::Exponential),
            _ => None,
        }
    }
}

/// Predicate deciding whether an error is worth retrying.
pub type RetryPredicate = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Invalid retry configuration.
#[derive(Debug, Error)]
pub enum RetryConfigError {
    #[error("max_delay ({max_delay:?}) must be >= base_delay ({base_delay:?})")]
    MaxDelayBelowBase {
        base_delay: Duration,
        max_delay: Duration,
    },

    #[error("exponential_base must be >= 1.0, got {0}")]
    InvalidExponentialBase(f64),

    #[error("jitter must be in [0.0, 1.0], got {0}")]
    InvalidJitter(f64),

    #[error("unknown retry strategy: {0}")]
    UnknownStrategy(String),
}

/// Retry policy configuration.
#[derive(Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt; the operation runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    pub strategy: RetryStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Multiplicative jitter factor in `[0, 1]`.
    pub jitter: f64,
    /// When present, only errors the predicate accepts are retried.
    pub retry_on: Option<RetryPredicate>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: RetryStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: 0.1,
            retry_on: None,
        }
    }
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("strategy", &self.strategy)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("exponential_base", &self.exponential_base)
            .field("jitter", &self.jitter)
            .field("retry_on", &self.retry_on.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

impl RetryConfig {
    /// Check configuration invariants.
    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if self.max_delay < self.base_delay {
            return Err(RetryConfigError::MaxDelayBelowBase {
                base_delay: self.base_delay,
                max_delay: self.max_delay,
            });
        }
        if self.exponential_base < 1.0 {
            return Err(RetryConfigError::InvalidExponentialBase(
                self.exponential_base,
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(RetryConfigError::InvalidJitter(self.jitter));
        }
        Ok(())
    }
}

impl TryFrom<&RetrySettings> for RetryConfig {
    type Error = RetryConfigError;

    fn try_from(settings: &RetrySettings) -> Result<Self, Self::Error> {
        let strategy = RetryStrategy::from_str(&settings.strategy)
            .ok_or_else(|| RetryConfigError::UnknownStrategy(settings.strategy.clone()))?;
        let config = Self {
            max_retries: settings.max_retries,
            strategy,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            exponential_base: settings.exponential_base,
            jitter: settings.jitter,
            retry_on: None,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Error raised when a retry loop exhausts its budget.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("operation failed after {attempts} attempt(s): {last_error}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        last_error: anyhow::Error,
    },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::MaxRetriesExceeded { attempts, .. } => *attempts,
        }
    }

    pub fn last_error(&self) -> &anyhow::Error {
        match self {
            Self::MaxRetriesExceeded { last_error, .. } => last_error,
        }
    }
}

/// Record of how a retried operation went.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    /// Zero-based index of the attempt that succeeded.
    pub attempt: u32,
    /// Stringified errors of each failed attempt, in order.
    pub errors: Vec<String>,
    /// Total time spent sleeping between attempts.
    pub total_delay: Duration,
}

/// Delay computation and retry loop driver.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy, validating configuration invariants.
    pub fn new(config: RetryConfig) -> Result<Self, RetryConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Default policy: 3 retries, exponential backoff from 1s.
    pub fn standard() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }

    /// Many quick retries for transient blips.
    pub fn aggressive() -> Self {
        Self {
            config: RetryConfig {
                max_retries: 5,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                ..RetryConfig::default()
            },
        }
    }

    /// Few widely-spaced retries for expensive operations.
    pub fn conservative() -> Self {
        Self {
            config: RetryConfig {
                max_retries: 2,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(120),
                ..RetryConfig::default()
            },
        }
    }

    /// Sub-second fixed delays for interactive paths.
    pub fn quick() -> Self {
        Self {
            config: RetryConfig {
                max_retries: 3,
                strategy: RetryStrategy::Fixed,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                ..RetryConfig::default()
            },
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether a failed attempt should be retried.
    ///
    /// `attempt` is the number of the attempt that just failed, starting
    /// at 0; retrying is allowed while `attempt <= max_retries` and the
    /// `retry_on` predicate (when present) accepts the error.
    pub fn should_retry(&self, error: &anyhow::Error, attempt: u32) -> bool {
        if attempt > self.config.max_retries {
            return false;
        }
        match &self.config.retry_on {
            Some(predicate) => predicate(error),
            None => true,
        }
    }

    /// Delay before the retry following failed attempt `attempt`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        let raw = match self.config.strategy {
            RetryStrategy::Fixed => base,
            RetryStrategy::Linear => base * f64::from(attempt + 1),
            RetryStrategy::Exponential => {
                #[allow(clippy::cast_possible_wrap)]
                let exponent = attempt as i32;
                base * self.config.exponential_base.powi(exponent)
            }
        };

        let capped = raw.min(self.config.max_delay.as_secs_f64());
        let jittered = if self.config.jitter > 0.0 {
            let factor = rand::thread_rng()
                .gen_range(1.0 - self.config.jitter..=1.0 + self.config.jitter);
            capped * factor
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Run an operation with retries.
    ///
    /// The operation runs at most `max_retries + 1` times, sleeping
    /// `calculate_delay(attempt)` after each failed attempt. The final
    /// failure is wrapped in [`RetryError::MaxRetriesExceeded`] carrying
    /// the attempt count and the last underlying error.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.execute_with_context(op).await.map(|(value, _)| value)
    }

    /// Like [`execute`](Self::execute), also returning the retry record.
    pub async fn execute_with_context<T, F, Fut>(
        &self,
        mut op: F,
    ) -> Result<(T, RetryContext), RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut context = RetryContext::default();

        for attempt in 0..=self.config.max_retries {
            match op().await {
                Ok(value) => {
                    context.attempt = attempt;
                    return Ok((value, context));
                }
                Err(error) => {
                    context.errors.push(error.to_string());

                    let exhausted = attempt >= self.config.max_retries;
                    if exhausted || !self.should_retry(&error, attempt) {
                        warn!(
                            attempts = attempt + 1,
                            error = %error,
                            "retry budget exhausted"
                        );
                        return Err(RetryError::MaxRetriesExceeded {
                            attempts: attempt + 1,
                            last_error: error,
                        });
                    }

                    let delay = self.calculate_delay(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed, backing off"
                    );
                    context.total_delay += delay;
                    tokio::time::sleep(delay).await;
                }
            }
        }

        unreachable!("retry loop returns on success or final failure")
    }
}
