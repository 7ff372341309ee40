//! Execution state models

use crate::core::error::StepError;
use crate::core::step::StepOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Overall pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Run was created but has not started
    Pending,
    /// A step is currently executing
    Running,
    /// Every step succeeded
    Succeeded,
    /// A step failed after exhausting its retries, or the run was cancelled
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Succeeded | ExecutionStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
        }
    }

    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        matches!(
            (self, next),
            (ExecutionStatus::Pending, ExecutionStatus::Running)
                | (ExecutionStatus::Running, ExecutionStatus::Succeeded)
                | (ExecutionStatus::Running, ExecutionStatus::Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

/// Outcome of a single step invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Succeeded,
    Failed,
    TimedOut,
    /// An upstream step did not succeed, so this one never ran
    NotAttempted,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::TimedOut => "timed-out",
            StepStatus::NotAttempted => "not-attempted",
        }
    }
}

/// Rejected state machine move
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid run transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

/// Record of one step invocation, fixed once the step finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    step_name: String,
    attempt: usize,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    started_at: Option<DateTime<Utc>>,
    duration_ms: u64,
    status: StepStatus,
    error: Option<String>,
}

impl StepResult {
    /// Result of an invocation that succeeded
    pub fn succeeded(
        step_name: &str,
        attempt: usize,
        started_at: DateTime<Utc>,
        duration: Duration,
        output: &StepOutput,
    ) -> Self {
        Self {
            step_name: step_name.to_string(),
            attempt,
            exit_code: Some(output.exit_code),
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            started_at: Some(started_at),
            duration_ms: duration.as_millis() as u64,
            status: StepStatus::Succeeded,
            error: None,
        }
    }

    /// Result of an invocation that failed, timed out, or was cancelled
    pub fn failed(
        step_name: &str,
        attempt: usize,
        started_at: DateTime<Utc>,
        duration: Duration,
        error: &StepError,
    ) -> Self {
        let (stdout, stderr) = error.captured_output();
        Self {
            step_name: step_name.to_string(),
            attempt,
            exit_code: error.exit_code(),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            started_at: Some(started_at),
            duration_ms: duration.as_millis() as u64,
            status: error.status(),
            error: Some(error.to_string()),
        }
    }

    /// Placeholder for a step that never ran
    pub fn not_attempted(step_name: &str, reason: &str) -> Self {
        Self {
            step_name: step_name.to_string(),
            attempt: 0,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            started_at: None,
            duration_ms: 0,
            status: StepStatus::NotAttempted,
            error: Some(reason.to_string()),
        }
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// One execution instance of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    run_id: Uuid,
    pipeline_name: String,
    status: ExecutionStatus,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    results: Vec<StepResult>,
}

impl PipelineRun {
    /// Create a pending run
    pub fn new(pipeline_name: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline_name: pipeline_name.to_string(),
            status: ExecutionStatus::Pending,
            started_at: None,
            finished_at: None,
            results: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Step results in invocation order
    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    /// Mark the run as started
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(ExecutionStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the run as succeeded
    pub fn succeed(&mut self) -> Result<(), InvalidTransition> {
        self.transition(ExecutionStatus::Succeeded)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the run as failed
    pub fn fail(&mut self) -> Result<(), InvalidTransition> {
        self.transition(ExecutionStatus::Failed)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, next: ExecutionStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Append the result of a finished invocation
    pub fn record(&mut self, result: StepResult) {
        self.results.push(result);
    }

    /// All invocations of a step, oldest first
    pub fn results_for(&self, step_name: &str) -> impl Iterator<Item = &StepResult> + '_ {
        let step_name = step_name.to_string();
        self.results.iter().filter(move |r| r.step_name == step_name)
    }

    /// Most recent invocation of a step
    pub fn final_result(&self, step_name: &str) -> Option<&StepResult> {
        self.results_for(step_name).last()
    }

    /// Number of times a step actually ran
    pub fn attempts(&self, step_name: &str) -> usize {
        self.results_for(step_name)
            .filter(|r| r.status != StepStatus::NotAttempted)
            .count()
    }

    /// Stdout of the step's successful invocation
    pub fn output_of(&self, step_name: &str) -> Option<&str> {
        self.results_for(step_name)
            .find(|r| r.is_success())
            .map(|r| r.stdout())
    }

    /// Wall-clock duration of a finished run
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.signed_duration_since(start).to_std().ok(),
            _ => None,
        }
    }
}
