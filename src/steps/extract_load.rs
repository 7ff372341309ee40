//! Extract/load step - runs the ELT script as a local subprocess

use crate::core::{Step, StepContext, StepError, StepOutput};
use crate::runtime::{ProcessRunner, ProcessSpec, RuntimeError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Runs `<interpreter> <script>` and waits for it, up to a timeout
#[derive(Clone)]
pub struct ExtractLoadStep {
    name: String,
    interpreter: String,
    script: PathBuf,
    timeout: Duration,
    runner: Arc<dyn ProcessRunner>,
}

impl ExtractLoadStep {
    /// Create a step with the default `python` interpreter and a 300 second timeout
    pub fn new(
        name: impl Into<String>,
        script: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            name: name.into(),
            interpreter: "python".to_string(),
            script: script.into(),
            timeout: Duration::from_secs(300),
            runner,
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn process_spec(&self) -> ProcessSpec {
        ProcessSpec::new(&self.interpreter)
            .arg(self.script.display().to_string())
            .timeout(self.timeout)
    }

    async fn invoke(&self) -> Result<StepOutput, StepError> {
        match tokio::fs::metadata(&self.script).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(StepError::ScriptNotAFile(self.script.clone())),
            Err(_) => return Err(StepError::ScriptNotFound(self.script.clone())),
        }

        let output = self
            .runner
            .run(&self.process_spec())
            .await
            .map_err(|e| match e {
                RuntimeError::Timeout(limit) => StepError::Timeout(limit),
                RuntimeError::NotFound(program) => {
                    StepError::Spawn(format!("interpreter '{}' not found", program))
                }
                other => StepError::Spawn(other.to_string()),
            })?;

        info!("Script stdout: {}", output.stdout);
        if !output.stderr.is_empty() {
            warn!("Script stderr: {}", output.stderr);
        }

        if !output.success() {
            return Err(StepError::NonZeroExit {
                code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        info!("ELT script completed successfully");
        Ok(StepOutput {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[async_trait]
impl Step for ExtractLoadStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        info!(
            run_id = %ctx.short_run_id(),
            attempt = ctx.attempt,
            "Starting ELT script: {}",
            self.script.display()
        );

        let result = self.invoke().await;
        if let Err(e) = &result {
            error!("ELT script failed: {}", e);
        }
        result
    }
}
