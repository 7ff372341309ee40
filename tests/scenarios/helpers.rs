//! Test utility functions for elt-pipeline scenarios

use async_trait::async_trait;
use elt_pipeline::core::{
    ExecutionStatus, HostPaths, Pipeline, PipelineConfig, PipelineRun, StepStatus,
};
use elt_pipeline::execution::{ExecutionEngine, Scheduler};
use elt_pipeline::runtime::{
    ContainerEngine, ContainerExit, ContainerSpec, ProcessOutput, ProcessRunner, ProcessSpec,
    Runtime, RuntimeError,
};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// What the fake process runner does on its next call
#[derive(Debug, Clone)]
pub enum ProcessBehavior {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    Timeout,
    /// Never returns; only cancellation ends the call
    Hang,
}

impl ProcessBehavior {
    pub fn ok(stdout: &str) -> Self {
        ProcessBehavior::Exit {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        ProcessBehavior::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// Process runner that replays scripted behaviors and records every call
///
/// Once the script is exhausted every call exits 0 with no output.
#[derive(Default)]
pub struct ScriptedRunner {
    behaviors: Mutex<VecDeque<ProcessBehavior>>,
    calls: Mutex<Vec<ProcessSpec>>,
}

impl ScriptedRunner {
    pub fn new(behaviors: Vec<ProcessBehavior>) -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(behaviors.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<ProcessSpec> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, RuntimeError> {
        self.calls.lock().unwrap().push(spec.clone());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ProcessBehavior::ok(""));

        match behavior {
            ProcessBehavior::Exit {
                code,
                stdout,
                stderr,
            } => Ok(ProcessOutput {
                exit_code: code,
                stdout,
                stderr,
            }),
            ProcessBehavior::Timeout => Err(RuntimeError::Timeout(
                spec.timeout.unwrap_or(Duration::from_secs(300)),
            )),
            ProcessBehavior::Hang => std::future::pending().await,
        }
    }
}

/// What the fake container engine does on its next launch
#[derive(Debug, Clone)]
pub enum ContainerBehavior {
    Exit { code: i32, stderr: String },
    LaunchError(String),
    Hang,
}

impl ContainerBehavior {
    pub fn exit(code: i32) -> Self {
        ContainerBehavior::Exit {
            code,
            stderr: String::new(),
        }
    }
}

/// Container engine that replays scripted behaviors and records launches and kills
#[derive(Default)]
pub struct ScriptedEngine {
    behaviors: Mutex<VecDeque<ContainerBehavior>>,
    launched: Mutex<Vec<ContainerSpec>>,
    killed: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new(behaviors: Vec<ContainerBehavior>) -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(behaviors.into()),
            ..Default::default()
        })
    }

    pub fn launched(&self) -> Vec<ContainerSpec> {
        self.launched.lock().unwrap().clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerEngine for ScriptedEngine {
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerExit, RuntimeError> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ContainerBehavior::exit(0));

        match behavior {
            ContainerBehavior::LaunchError(message) => Err(RuntimeError::Launch(message)),
            ContainerBehavior::Exit { code, stderr } => {
                self.launched.lock().unwrap().push(spec.clone());
                Ok(ContainerExit {
                    name: spec.name.clone(),
                    exit_code: code,
                    stdout: "=== Starting dbt transformations ===\n".to_string(),
                    stderr,
                })
            }
            ContainerBehavior::Hang => {
                self.launched.lock().unwrap().push(spec.clone());
                std::future::pending().await
            }
        }
    }

    async fn kill(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        self.killed.lock().unwrap().push(spec.name.clone());
        Ok(())
    }
}

/// A host layout in a temp dir plus scripted collaborators
pub struct Fixture {
    pub dir: TempDir,
    pub host: HostPaths,
    pub script: PathBuf,
    pub runner: Arc<ScriptedRunner>,
    pub engine: Arc<ScriptedEngine>,
}

impl Fixture {
    pub fn new(processes: Vec<ProcessBehavior>, containers: Vec<ContainerBehavior>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("custom_postgres")).unwrap();
        std::fs::create_dir_all(dir.path().join(".dbt")).unwrap();

        let script = dir.path().join("elt_script.py");
        std::fs::write(&script, "print('42 rows loaded')\n").unwrap();

        let host = HostPaths::new(dir.path(), dir.path().join(".dbt"));

        Self {
            dir,
            host,
            script,
            runner: ScriptedRunner::new(processes),
            engine: ScriptedEngine::new(containers),
        }
    }

    /// The built-in definition pointed at the fixture script, with instant retries
    pub fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::elt_and_dbt();
        config.default_args.retry_delay_secs = 0;
        config.variables.insert(
            "elt_script_path".to_string(),
            self.script.display().to_string(),
        );
        config
    }

    pub fn runtime(&self) -> Runtime {
        Runtime::new(self.runner.clone(), self.engine.clone())
    }

    pub fn pipeline(&self) -> Pipeline {
        self.config().build(&self.host, &self.runtime()).unwrap()
    }

    /// Scheduler with the fixture pipeline registered
    pub async fn scheduler(&self) -> Arc<Scheduler> {
        let scheduler = Scheduler::new(ExecutionEngine::new());
        scheduler.register(self.pipeline()).await.unwrap();
        Arc::new(scheduler)
    }

    /// Trigger one run and wait for it
    pub async fn run(&self) -> PipelineRun {
        self.run_config(self.config()).await
    }

    /// Build `config` against the fixture collaborators and run it once
    pub async fn run_config(&self, config: PipelineConfig) -> PipelineRun {
        let pipeline = config.build(&self.host, &self.runtime()).unwrap();
        let name = pipeline.name().to_string();
        let scheduler = Scheduler::new(ExecutionEngine::new());
        scheduler.register(pipeline).await.unwrap();
        scheduler.trigger(&name).await.unwrap()
    }

    /// The fixture config with retries turned off
    pub fn config_without_retries(&self) -> PipelineConfig {
        let mut config = self.config();
        config.default_args.retries = 0;
        config
    }
}

/// Poll until the pipeline has an active run
pub async fn wait_for_active_run(scheduler: &Scheduler, name: &str) -> Uuid {
    for _ in 0..200 {
        if let Some(id) = scheduler.active_runs(name).await.into_iter().next() {
            return id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("No active run of {} appeared", name);
}

/// Assert the run succeeded
pub fn assert_run_succeeded(run: &PipelineRun) {
    assert_eq!(
        run.status(),
        ExecutionStatus::Succeeded,
        "Run should succeed, results: {:#?}",
        run.results()
    );
}

/// Assert the run failed
pub fn assert_run_failed(run: &PipelineRun) {
    assert_eq!(
        run.status(),
        ExecutionStatus::Failed,
        "Run should fail, results: {:#?}",
        run.results()
    );
}

/// Assert the final status of a step
pub fn assert_step_status(run: &PipelineRun, step: &str, expected: StepStatus) {
    let actual = run
        .final_result(step)
        .unwrap_or_else(|| panic!("Step {} has no result", step))
        .status();
    assert_eq!(actual, expected, "Unexpected status for step {}", step);
}

/// Assert the order of step names across all recorded invocations
pub fn assert_result_order(run: &PipelineRun, expected: &[&str]) {
    let actual: Vec<&str> = run.results().iter().map(|r| r.step_name()).collect();
    assert_eq!(actual, expected, "Result order mismatch");
}
