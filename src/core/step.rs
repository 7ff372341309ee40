//! Step abstraction

use crate::core::{context::StepContext, error::StepError};
use async_trait::async_trait;
use std::time::Duration;

/// A unit of work in a pipeline
///
/// Implementations perform one invocation per call to [`Step::run`]; retries
/// and ordering are the engine's concern.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable step identifier, unique within a pipeline
    fn name(&self) -> &str;

    /// Run the step once
    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError>;

    /// Release external resources after an in-flight invocation was dropped
    async fn on_cancel(&self, _ctx: &StepContext) {}
}

/// What a successful invocation produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// How often and how patiently a failed step is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: usize,
    /// Fixed wait before each retry
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: usize, retry_delay: Duration) -> Self {
        Self {
            retries,
            retry_delay,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> usize {
        self.retries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            retry_delay: Duration::from_secs(5 * 60),
        }
    }
}
