//! Step executor - runs one attempt of a step

use crate::core::{Step, StepContext, StepError, StepOutput, StepResult};
use crate::execution::CancelToken;
use chrono::Utc;
use std::time::Instant;
use tracing::{info, warn};

/// Result of executing one attempt
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    /// Step completed successfully
    Success {
        result: StepResult,
        output: StepOutput,
    },
    /// Step failed or timed out
    Failed { result: StepResult, error: StepError },
    /// The run was cancelled while the attempt was in flight
    Cancelled { result: StepResult },
}

impl ExecutionResult {
    /// The record for this attempt
    pub fn result(&self) -> &StepResult {
        match self {
            ExecutionResult::Success { result, .. }
            | ExecutionResult::Failed { result, .. }
            | ExecutionResult::Cancelled { result } => result,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }
}

/// Executes a single step attempt and times it
#[derive(Debug, Clone, Copy, Default)]
pub struct StepExecutor;

impl StepExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `step` once, racing it against cancellation
    ///
    /// On cancellation the in-flight future is dropped, which kills a
    /// spawned child, and the step's `on_cancel` hook runs.
    pub async fn execute(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
        cancel: &CancelToken,
    ) -> ExecutionResult {
        info!("Executing step: {} (attempt {})", step.name(), ctx.attempt);

        let started_at = Utc::now();
        let clock = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = step.run(ctx) => Some(result),
        };
        let elapsed = clock.elapsed();

        match outcome {
            Some(Ok(output)) => {
                info!("Step {} completed successfully", step.name());
                ExecutionResult::Success {
                    result: StepResult::succeeded(step.name(), ctx.attempt, started_at, elapsed, &output),
                    output,
                }
            }
            Some(Err(error)) => {
                warn!("Step {} attempt {} failed: {}", step.name(), ctx.attempt, error);
                ExecutionResult::Failed {
                    result: StepResult::failed(step.name(), ctx.attempt, started_at, elapsed, &error),
                    error,
                }
            }
            None => {
                warn!("Step {} cancelled", step.name());
                step.on_cancel(ctx).await;
                ExecutionResult::Cancelled {
                    result: StepResult::failed(
                        step.name(),
                        ctx.attempt,
                        started_at,
                        elapsed,
                        &StepError::Cancelled,
                    ),
                }
            }
        }
    }
}
