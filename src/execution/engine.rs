//! Main execution engine - drives a pipeline run step by step

use crate::core::{
    ExecutionStatus, InvalidTransition, Pipeline, PipelineRun, PipelineTask, StepContext,
    StepOutput, StepResult,
};
use crate::execution::{CancelToken, ExecutionResult, StepExecutor};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        total_steps: usize,
    },
    StepStarted {
        step_name: String,
        attempt: usize,
        max_attempts: usize,
    },
    StepOutput {
        step_name: String,
        output: String,
    },
    StepSucceeded {
        step_name: String,
        attempt: usize,
        duration: Duration,
    },
    StepFailed {
        step_name: String,
        attempt: usize,
        error: String,
        will_retry: bool,
    },
    StepRetrying {
        step_name: String,
        next_attempt: usize,
        max_attempts: usize,
        delay: Duration,
    },
    StepNotAttempted {
        step_name: String,
        reason: String,
    },
    RunFinished {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// How a step ended after all of its attempts
enum TaskOutcome {
    Succeeded(StepOutput),
    Failed,
    Cancelled,
}

/// Main pipeline execution engine
///
/// Runs the steps of a pipeline in order, retrying each according to its
/// policy, and stops at the first step that does not recover. Every attempt
/// is recorded on the [`PipelineRun`]; steps after the failure point are
/// recorded as not attempted.
#[derive(Default)]
pub struct ExecutionEngine {
    executor: StepExecutor,
    event_handlers: Vec<EventHandler>,
}

impl ExecutionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Execute the pipeline against `run`
    ///
    /// A pending run is started here; a run already marked running (by the
    /// scheduler) is picked up as is. Returns the final run status.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        run: &mut PipelineRun,
        cancel: &CancelToken,
    ) -> Result<ExecutionStatus, InvalidTransition> {
        if run.status() != ExecutionStatus::Running {
            run.start()?;
        }

        info!(
            "Starting pipeline execution: {} ({})",
            pipeline.name(),
            run.run_id()
        );
        self.emit(ExecutionEvent::RunStarted {
            run_id: run.run_id(),
            pipeline_name: pipeline.name().to_string(),
            total_steps: pipeline.len(),
        });

        let mut ctx = StepContext::new(run.run_id(), pipeline.name());
        let mut blocked: Option<String> = None;

        for task in pipeline.tasks() {
            if blocked.is_none() && cancel.is_cancelled() {
                blocked = Some("run cancelled".to_string());
            }

            if let Some(reason) = &blocked {
                info!("Skipping step {}: {}", task.name(), reason);
                run.record(StepResult::not_attempted(task.name(), reason));
                self.emit(ExecutionEvent::StepNotAttempted {
                    step_name: task.name().to_string(),
                    reason: reason.clone(),
                });
                continue;
            }

            match self.run_task(task, &ctx, run, cancel).await {
                TaskOutcome::Succeeded(output) => {
                    ctx.set_step_output(task.name(), output.stdout);
                }
                TaskOutcome::Failed => {
                    blocked = Some(format!("upstream step '{}' did not succeed", task.name()));
                }
                TaskOutcome::Cancelled => {
                    blocked = Some("run cancelled".to_string());
                }
            }
        }

        if blocked.is_none() {
            run.succeed()?;
            info!("Pipeline {} succeeded ({})", pipeline.name(), run.run_id());
        } else {
            run.fail()?;
            error!("Pipeline {} failed ({})", pipeline.name(), run.run_id());
        }

        self.emit(ExecutionEvent::RunFinished {
            run_id: run.run_id(),
            status: run.status(),
        });

        Ok(run.status())
    }

    /// Run one step through its retry policy
    async fn run_task(
        &self,
        task: &PipelineTask,
        ctx: &StepContext,
        run: &mut PipelineRun,
        cancel: &CancelToken,
    ) -> TaskOutcome {
        let policy = task.retry();
        let max_attempts = policy.max_attempts();

        for attempt in 1..=max_attempts {
            let step_ctx = ctx.for_step(task.name(), attempt);
            self.emit(ExecutionEvent::StepStarted {
                step_name: task.name().to_string(),
                attempt,
                max_attempts,
            });

            match self.executor.execute(task.step(), &step_ctx, cancel).await {
                ExecutionResult::Success { result, output } => {
                    if !output.stdout.is_empty() {
                        self.emit(ExecutionEvent::StepOutput {
                            step_name: task.name().to_string(),
                            output: output.stdout.clone(),
                        });
                    }
                    self.emit(ExecutionEvent::StepSucceeded {
                        step_name: task.name().to_string(),
                        attempt,
                        duration: result.duration(),
                    });
                    run.record(result);
                    return TaskOutcome::Succeeded(output);
                }
                ExecutionResult::Failed { result, error } => {
                    let will_retry = attempt < max_attempts;
                    self.emit(ExecutionEvent::StepFailed {
                        step_name: task.name().to_string(),
                        attempt,
                        error: error.to_string(),
                        will_retry,
                    });
                    run.record(result);

                    if !will_retry {
                        error!(
                            "Step {} failed after {} attempt(s): {}",
                            task.name(),
                            attempt,
                            error
                        );
                        return TaskOutcome::Failed;
                    }

                    warn!(
                        "Retrying step {} in {:?} (attempt {}/{})",
                        task.name(),
                        policy.retry_delay,
                        attempt + 1,
                        max_attempts
                    );
                    self.emit(ExecutionEvent::StepRetrying {
                        step_name: task.name().to_string(),
                        next_attempt: attempt + 1,
                        max_attempts,
                        delay: policy.retry_delay,
                    });

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return TaskOutcome::Cancelled,
                        _ = tokio::time::sleep(policy.retry_delay) => {}
                    }
                }
                ExecutionResult::Cancelled { result } => {
                    self.emit(ExecutionEvent::StepFailed {
                        step_name: task.name().to_string(),
                        attempt,
                        error: result.error().unwrap_or("cancelled").to_string(),
                        will_retry: false,
                    });
                    run.record(result);
                    return TaskOutcome::Cancelled;
                }
            }
        }

        TaskOutcome::Failed
    }
}
