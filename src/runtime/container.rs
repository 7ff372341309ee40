//! Container engine abstraction and a `docker` CLI implementation

use crate::runtime::{ProcessRunner, ProcessSpec, RuntimeError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// `docker run` exits with this status when the daemon itself failed
pub const DOCKER_LAUNCH_FAILURE: i32 = 125;

/// Default engine endpoint
pub const DEFAULT_DOCKER_URL: &str = "unix:///var/run/docker.sock";

/// Access mode of a bind mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MountMode {
    #[default]
    #[serde(rename = "rw")]
    ReadWrite,
    #[serde(rename = "ro")]
    ReadOnly,
}

/// A host path made visible inside the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub mode: MountMode,
}

impl Mount {
    /// Read/write bind mount
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            mode: MountMode::ReadWrite,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.mode = MountMode::ReadOnly;
        self
    }

    /// Value for `docker run --mount`
    pub fn to_docker_arg(&self) -> String {
        let mut arg = format!(
            "type=bind,source={},target={}",
            self.source.display(),
            self.target
        );
        if self.mode == MountMode::ReadOnly {
            arg.push_str(",readonly");
        }
        arg
    }
}

/// Everything needed to launch one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name, also used to kill it on cancellation
    pub name: String,
    pub image: String,
    pub docker_url: String,
    pub network_mode: Option<String>,
    /// Remove the container once it exits
    pub auto_remove: bool,
    pub mounts: Vec<Mount>,
    pub env: BTreeMap<String, String>,
    pub command: Vec<String>,
}

/// How a container finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerExit {
    pub name: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs containers to completion
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Launch the container and wait for it to exit
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerExit, RuntimeError>;

    /// Force-stop a running container
    async fn kill(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;
}

/// Drives the `docker` command line client
#[derive(Clone)]
pub struct DockerCli {
    binary: String,
    runner: Arc<dyn ProcessRunner>,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            binary: "docker".to_string(),
            runner,
        }
    }

    /// Use a different client binary (e.g. `podman`)
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Arguments for `docker run`
    pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "--host".to_string(),
            normalize_docker_url(&spec.docker_url),
            "run".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];

        if spec.auto_remove {
            args.push("--rm".to_string());
        }

        if let Some(network) = &spec.network_mode {
            args.push("--network".to_string());
            args.push(network.clone());
        }

        for mount in &spec.mounts {
            args.push("--mount".to_string());
            args.push(mount.to_docker_arg());
        }

        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }

    /// Arguments for `docker kill`
    pub fn kill_args(spec: &ContainerSpec) -> Vec<String> {
        vec![
            "--host".to_string(),
            normalize_docker_url(&spec.docker_url),
            "kill".to_string(),
            spec.name.clone(),
        ]
    }

    fn launch_error(&self, err: RuntimeError) -> RuntimeError {
        match err {
            RuntimeError::NotFound(program) => {
                RuntimeError::Launch(format!("container client '{}' not found", program))
            }
            RuntimeError::Spawn { program, message } => {
                RuntimeError::Launch(format!("could not start '{}': {}", program, message))
            }
            other => other,
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerExit, RuntimeError> {
        let process = ProcessSpec::new(&self.binary).args(Self::run_args(spec));
        debug!("Launching container: {}", process.display());

        let output = self
            .runner
            .run(&process)
            .await
            .map_err(|e| self.launch_error(e))?;

        if output.exit_code == DOCKER_LAUNCH_FAILURE {
            return Err(RuntimeError::Launch(output.stderr.trim().to_string()));
        }

        Ok(ContainerExit {
            name: spec.name.clone(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn kill(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let process = ProcessSpec::new(&self.binary).args(Self::kill_args(spec));
        let output = self
            .runner
            .run(&process)
            .await
            .map_err(|e| self.launch_error(e))?;

        if !output.success() {
            warn!("Failed to kill container {}: {}", spec.name, output.stderr.trim());
            return Err(RuntimeError::Launch(output.stderr.trim().to_string()));
        }
        Ok(())
    }
}

/// `unix://var/run/docker.sock` is accepted by some clients as an absolute
/// socket path; the docker CLI wants `unix:///var/run/docker.sock`.
pub fn normalize_docker_url(url: &str) -> String {
    match url.strip_prefix("unix://") {
        Some(path) if !path.starts_with('/') => format!("unix:///{}", path),
        _ => url.to_string(),
    }
}
