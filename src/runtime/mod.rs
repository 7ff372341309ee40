//! Collaborators that reach outside the process: child processes and the container engine

pub mod container;
pub mod process;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use container::{ContainerEngine, ContainerExit, ContainerSpec, DockerCli, Mount, MountMode};
pub use process::{ProcessOutput, ProcessSpec, TokioProcessRunner};

/// Error types for runtime operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Executable not found: {0}")]
    NotFound(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("Container engine error: {0}")]
    Launch(String),
}

/// Trait for running child processes - allows substituting a fake in tests
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run a process to completion (or until its timeout) and capture its output
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, RuntimeError>;
}

/// The collaborators a pipeline definition is built against
#[derive(Clone)]
pub struct Runtime {
    pub processes: Arc<dyn ProcessRunner>,
    pub containers: Arc<dyn ContainerEngine>,
}

impl Runtime {
    pub fn new(processes: Arc<dyn ProcessRunner>, containers: Arc<dyn ContainerEngine>) -> Self {
        Self {
            processes,
            containers,
        }
    }

    /// Real subprocesses plus the `docker` CLI
    pub fn local() -> Self {
        let processes: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
        let containers = Arc::new(DockerCli::new(processes.clone()));
        Self::new(processes, containers)
    }
}
