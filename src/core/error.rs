//! Step failure taxonomy

use crate::core::state::StepStatus;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why a step invocation did not succeed
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// The configured script does not exist; nothing was spawned
    #[error("ELT script not found at {}", .0.display())]
    ScriptNotFound(PathBuf),

    /// The script path exists but is a directory or other non-regular file
    #[error("ELT script path {} is not a regular file", .0.display())]
    ScriptNotAFile(PathBuf),

    /// The child process outlived its wall-clock budget and was killed
    #[error("ELT script timed out after {0:?}")]
    Timeout(Duration),

    /// The script ran to completion but reported failure
    #[error("Script failed with return code {code}. Error: {stderr}")]
    NonZeroExit {
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// The container engine could not be reached or the image could not be run
    #[error("Container launch failed: {0}")]
    ContainerLaunch(String),

    /// The command inside the container exited non-zero
    #[error("Container exited with status {code}")]
    ContainerExit {
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// The process could not be started for a reason other than a missing script
    #[error("Failed to start process: {0}")]
    Spawn(String),

    /// The run was cancelled while this step was in flight
    #[error("Step cancelled")]
    Cancelled,
}

impl StepError {
    /// Status recorded in the step result for this failure
    pub fn status(&self) -> StepStatus {
        match self {
            StepError::Timeout(_) => StepStatus::TimedOut,
            _ => StepStatus::Failed,
        }
    }

    /// Exit code reported by the process or container, when one exists
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            StepError::NonZeroExit { code, .. } | StepError::ContainerExit { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }

    /// Captured (stdout, stderr) carried by the failure
    pub fn captured_output(&self) -> (&str, &str) {
        match self {
            StepError::NonZeroExit { stdout, stderr, .. }
            | StepError::ContainerExit { stdout, stderr, .. } => (stdout, stderr),
            _ => ("", ""),
        }
    }
}
