//! Pipeline domain model

use crate::core::step::{RetryPolicy, Step};
use anyhow::Result;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A step together with the retry policy that applies to it
#[derive(Clone)]
pub struct PipelineTask {
    step: Arc<dyn Step>,
    retry: RetryPolicy,
}

impl PipelineTask {
    pub fn name(&self) -> &str {
        self.step.name()
    }

    pub fn step(&self) -> &dyn Step {
        self.step.as_ref()
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }
}

/// A linear pipeline: each step runs only after the previous one succeeded
#[derive(Clone)]
pub struct Pipeline {
    name: String,
    description: Option<String>,
    max_active_runs: usize,
    tasks: Vec<PipelineTask>,
}

impl Pipeline {
    /// Start building a pipeline
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder {
            name: name.into(),
            description: None,
            max_active_runs: 1,
            default_retry: RetryPolicy::default(),
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// How many runs of this pipeline may be in flight at once
    pub fn max_active_runs(&self) -> usize {
        self.max_active_runs
    }

    /// Steps in execution order
    pub fn tasks(&self) -> &[PipelineTask] {
        &self.tasks
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("max_active_runs", &self.max_active_runs)
            .field("steps", &self.step_names())
            .finish()
    }
}

/// Builder for [`Pipeline`]; the built pipeline is immutable
pub struct PipelineBuilder {
    name: String,
    description: Option<String>,
    max_active_runs: usize,
    default_retry: RetryPolicy,
    tasks: Vec<PipelineTask>,
}

impl PipelineBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn max_active_runs(mut self, max_active_runs: usize) -> Self {
        self.max_active_runs = max_active_runs;
        self
    }

    /// Retry policy for steps added without an explicit one
    pub fn default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    /// Append a step using the default retry policy
    pub fn step(self, step: Arc<dyn Step>) -> Self {
        let retry = self.default_retry;
        self.step_with_retry(step, retry)
    }

    /// Append a step with its own retry policy
    pub fn step_with_retry(mut self, step: Arc<dyn Step>, retry: RetryPolicy) -> Self {
        self.tasks.push(PipelineTask { step, retry });
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }
        if self.tasks.is_empty() {
            anyhow::bail!("Pipeline '{}' has no steps", self.name);
        }
        if self.max_active_runs == 0 {
            anyhow::bail!("Pipeline '{}' must allow at least one active run", self.name);
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.name()) {
                anyhow::bail!("Duplicate step name: {}", task.name());
            }
        }

        Ok(Pipeline {
            name: self.name,
            description: self.description,
            max_active_runs: self.max_active_runs,
            tasks: self.tasks,
        })
    }
}
