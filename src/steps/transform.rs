//! Transform step - runs dbt inside a container

use crate::core::config::{render_template, ContainerStepConfig};
use crate::core::{Step, StepContext, StepError, StepOutput};
use crate::runtime::container::DEFAULT_DOCKER_URL;
use crate::runtime::{ContainerEngine, ContainerSpec, Mount};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Launches a container and maps its exit status to the step outcome
///
/// The container is named after the run and attempt (see
/// [`StepContext::resource_name`]), so a cancelled attempt can be killed and a
/// finished one inspected when `auto_remove` is off.
#[derive(Clone)]
pub struct TransformStep {
    name: String,
    image: String,
    docker_url: String,
    network_mode: Option<String>,
    auto_remove: bool,
    mounts: Vec<Mount>,
    env: BTreeMap<String, String>,
    command: Vec<String>,
    engine: Arc<dyn ContainerEngine>,
}

impl TransformStep {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        engine: Arc<dyn ContainerEngine>,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            docker_url: DEFAULT_DOCKER_URL.to_string(),
            network_mode: None,
            auto_remove: false,
            mounts: Vec::new(),
            env: BTreeMap::new(),
            command: Vec::new(),
            engine,
        }
    }

    /// Build from configuration, rendering placeholders in mount sources and env values
    pub fn from_config(
        config: &ContainerStepConfig,
        vars: &BTreeMap<String, String>,
        engine: Arc<dyn ContainerEngine>,
    ) -> Result<Self> {
        let mut step = Self::new(&config.id, &config.image, engine)
            .with_docker_url(&config.docker_url)
            .with_auto_remove(config.auto_remove)
            .with_command(config.command.iter().cloned());

        if let Some(network) = &config.network_mode {
            step = step.with_network(network);
        }

        for mount in &config.mounts {
            let source = render_template(&mount.source, vars)
                .with_context(|| format!("Step '{}' mount {}", config.id, mount.target))?;
            step.mounts.push(Mount {
                source: source.into(),
                target: mount.target.clone(),
                mode: mount.mode,
            });
        }

        for (key, value) in &config.env {
            let value = render_template(value, vars)
                .with_context(|| format!("Step '{}' env {}", config.id, key))?;
            step = step.with_env(key, value);
        }

        Ok(step)
    }

    pub fn with_docker_url(mut self, url: impl Into<String>) -> Self {
        self.docker_url = url.into();
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network_mode = Some(network.into());
        self
    }

    pub fn with_auto_remove(mut self, auto_remove: bool) -> Self {
        self.auto_remove = auto_remove;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// The container this step launches for the given attempt
    pub fn container_spec(&self, ctx: &StepContext) -> ContainerSpec {
        ContainerSpec {
            name: ctx.resource_name(),
            image: self.image.clone(),
            docker_url: self.docker_url.clone(),
            network_mode: self.network_mode.clone(),
            auto_remove: self.auto_remove,
            mounts: self.mounts.clone(),
            env: self.env.clone(),
            command: self.command.clone(),
        }
    }
}

#[async_trait]
impl Step for TransformStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let spec = self.container_spec(ctx);
        info!(
            run_id = %ctx.short_run_id(),
            attempt = ctx.attempt,
            "Launching container {} from image {}",
            spec.name,
            spec.image
        );

        let exit = self.engine.run(&spec).await.map_err(|e| {
            error!("Container {} could not be launched: {}", spec.name, e);
            StepError::ContainerLaunch(e.to_string())
        })?;

        if !exit.stdout.is_empty() {
            info!("Container stdout: {}", exit.stdout);
        }
        if !exit.stderr.is_empty() {
            warn!("Container stderr: {}", exit.stderr);
        }

        if exit.exit_code != 0 {
            error!("Container {} exited with status {}", exit.name, exit.exit_code);
            return Err(StepError::ContainerExit {
                code: exit.exit_code,
                stdout: exit.stdout,
                stderr: exit.stderr,
            });
        }

        info!("Container {} completed successfully", exit.name);
        Ok(StepOutput {
            exit_code: exit.exit_code,
            stdout: exit.stdout,
            stderr: exit.stderr,
        })
    }

    async fn on_cancel(&self, ctx: &StepContext) {
        let spec = self.container_spec(ctx);
        warn!("Killing container {} after cancellation", spec.name);
        if let Err(e) = self.engine.kill(&spec).await {
            warn!("Could not kill container {}: {}", spec.name, e);
        }
    }
}
