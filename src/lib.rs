//! elt-pipeline - runs an extract/load script, then a dbt transform in a container

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod runtime;
pub mod steps;

// Re-export commonly used types
pub use crate::core::{
    ExecutionStatus, HostPaths, Pipeline, PipelineConfig, PipelineRun, RetryPolicy, Step,
    StepContext, StepError, StepOutput, StepResult, StepStatus,
};
pub use execution::{CancelHandle, CancelToken, ExecutionEngine, ExecutionEvent, Scheduler, SchedulerError};
pub use runtime::{ContainerEngine, ProcessRunner, Runtime, RuntimeError};
pub use steps::{ExtractLoadStep, TransformStep};
