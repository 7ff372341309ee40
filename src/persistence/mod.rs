//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{ExecutionStatus, PipelineRun};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a pipeline run for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Step invocations recorded, including not-attempted entries
    pub results: usize,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        Self {
            run_id: run.run_id(),
            pipeline_name: run.pipeline_name().to_string(),
            status: run.status(),
            started_at: run.started_at(),
            finished_at: run.finished_at(),
            results: run.results().len(),
        }
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Insert or replace a run
    async fn save_run(&self, run: &PipelineRun) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>>;

    /// All runs of a pipeline, newest first
    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<PipelineRun>>;

    /// Pipelines with at least one recorded run, sorted by name
    async fn list_pipelines(&self) -> Result<Vec<String>>;

    /// Most recent run of a pipeline
    async fn latest_run(&self, pipeline_name: &str) -> Result<Option<PipelineRun>> {
        Ok(self.list_runs(pipeline_name).await?.into_iter().next())
    }
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &PipelineRun) -> Result<()> {
        self.runs.write().await.insert(run.run_id(), run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<PipelineRun>> {
        let runs = self.runs.read().await;
        let mut matching: Vec<PipelineRun> = runs
            .values()
            .filter(|r| r.pipeline_name() == pipeline_name)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at().cmp(&a.started_at()));
        Ok(matching)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.pipeline_name().to_string()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
