//! Pipeline execution engine

pub mod cancel;
pub mod engine;
pub mod executor;
pub mod scheduler;

pub use cancel::{CancelHandle, CancelToken};
pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{ExecutionResult, StepExecutor};
pub use scheduler::{Scheduler, SchedulerError};
