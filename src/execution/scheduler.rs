//! Pipeline scheduler - registration, manual triggers and the active-run cap

use crate::core::{InvalidTransition, Pipeline, PipelineRun};
use crate::execution::{CancelHandle, ExecutionEngine};
use crate::persistence::PersistenceBackend;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

/// Error types for scheduler operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("Pipeline '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Pipeline '{name}' already has {limit} active run(s)")]
    MaxActiveRuns { name: String, limit: usize },

    #[error(transparent)]
    Engine(#[from] InvalidTransition),

    #[error("Run task ended abnormally: {0}")]
    RunTask(String),
}

struct Registered {
    pipeline: Arc<Pipeline>,
    slots: Arc<Semaphore>,
}

struct ActiveRun {
    pipeline_name: String,
    cancel: CancelHandle,
}

type ActiveRuns = Arc<Mutex<HashMap<Uuid, ActiveRun>>>;

fn lock(active: &Mutex<HashMap<Uuid, ActiveRun>>) -> MutexGuard<'_, HashMap<Uuid, ActiveRun>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps a run listed as active while its trigger is being awaited
///
/// Dropping it, whether the run finished or the caller gave up waiting,
/// unlists the run and signals its cancel handle.
struct ActiveRunGuard {
    active: ActiveRuns,
    run_id: Uuid,
}

impl ActiveRunGuard {
    fn register(active: &ActiveRuns, run_id: Uuid, pipeline_name: &str, cancel: CancelHandle) -> Self {
        lock(active).insert(
            run_id,
            ActiveRun {
                pipeline_name: pipeline_name.to_string(),
                cancel,
            },
        );
        Self {
            active: active.clone(),
            run_id,
        }
    }
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        if let Some(run) = lock(&self.active).remove(&self.run_id) {
            run.cancel.cancel();
        }
    }
}

/// Owns registered pipelines and runs them on demand
///
/// Each pipeline gets `max_active_runs` slots. A trigger that finds no free
/// slot is rejected rather than queued. A slot stays taken until the run has
/// finished cleaning up, even if the trigger was dropped earlier.
pub struct Scheduler {
    engine: Arc<ExecutionEngine>,
    pipelines: RwLock<HashMap<String, Registered>>,
    active: ActiveRuns,
    store: Option<Arc<dyn PersistenceBackend>>,
}

impl Scheduler {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            pipelines: RwLock::new(HashMap::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
            store: None,
        }
    }

    /// Record runs in `store` when they start and when they finish
    pub fn with_store(mut self, store: Arc<dyn PersistenceBackend>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn register(&self, pipeline: Pipeline) -> Result<(), SchedulerError> {
        let mut pipelines = self.pipelines.write().await;
        if pipelines.contains_key(pipeline.name()) {
            return Err(SchedulerError::AlreadyRegistered(pipeline.name().to_string()));
        }

        info!(
            "Registered pipeline {} ({} steps, max {} active run(s))",
            pipeline.name(),
            pipeline.len(),
            pipeline.max_active_runs()
        );
        pipelines.insert(
            pipeline.name().to_string(),
            Registered {
                slots: Arc::new(Semaphore::new(pipeline.max_active_runs())),
                pipeline: Arc::new(pipeline),
            },
        );
        Ok(())
    }

    /// Names of registered pipelines, sorted
    pub async fn pipelines(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pipelines.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run a pipeline once and wait for it to finish
    ///
    /// The returned run carries every step result; its status tells whether
    /// the pipeline succeeded. The run itself executes on a spawned task:
    /// dropping this future cancels the run, and the task still runs the
    /// step cleanup and saves the final state.
    pub async fn trigger(&self, name: &str) -> Result<PipelineRun, SchedulerError> {
        let (pipeline, slots) = {
            let pipelines = self.pipelines.read().await;
            let registered = pipelines
                .get(name)
                .ok_or_else(|| SchedulerError::UnknownPipeline(name.to_string()))?;
            (registered.pipeline.clone(), registered.slots.clone())
        };

        let permit = slots.try_acquire_owned().map_err(|_| {
            warn!("Rejecting trigger of {}: max active runs reached", name);
            SchedulerError::MaxActiveRuns {
                name: name.to_string(),
                limit: pipeline.max_active_runs(),
            }
        })?;

        let mut run = PipelineRun::new(pipeline.name());
        run.start()?;
        let cancel = CancelHandle::new();
        let token = cancel.token();
        let guard = ActiveRunGuard::register(&self.active, run.run_id(), pipeline.name(), cancel);

        let engine = self.engine.clone();
        let store = self.store.clone();
        let task = tokio::spawn(async move {
            let _permit = permit;
            persist(store.as_deref(), &run).await;
            let result = engine.execute(&pipeline, &mut run, &token).await;
            persist(store.as_deref(), &run).await;
            result.map(|_| run)
        });

        let outcome = task.await;
        drop(guard);

        match outcome {
            Ok(result) => Ok(result?),
            Err(e) => Err(SchedulerError::RunTask(e.to_string())),
        }
    }

    /// Ids of runs of `name` that are in flight
    pub async fn active_runs(&self, name: &str) -> Vec<Uuid> {
        lock(&self.active)
            .iter()
            .filter(|(_, active)| active.pipeline_name == name)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Cancel an in-flight run; false if no such run is active
    pub async fn cancel(&self, run_id: Uuid) -> bool {
        match lock(&self.active).get(&run_id) {
            Some(active) => {
                info!("Cancelling run {}", run_id);
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight run; returns how many were signalled
    pub async fn cancel_all(&self) -> usize {
        let active = lock(&self.active);
        for (run_id, run) in active.iter() {
            info!("Cancelling run {}", run_id);
            run.cancel.cancel();
        }
        active.len()
    }
}

async fn persist(store: Option<&dyn PersistenceBackend>, run: &PipelineRun) {
    if let Some(store) = store {
        if let Err(e) = store.save_run(run).await {
            warn!("Failed to save run {}: {:#}", run.run_id(), e);
        }
    }
}
