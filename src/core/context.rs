//! Step context - run identity and upstream outputs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Context handed to a step invocation
///
/// Carries the identity of the run and attempt, plus the outputs of steps that
/// already succeeded in this run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepContext {
    /// Run this invocation belongs to
    pub run_id: Uuid,

    /// Name of the pipeline being run
    pub pipeline_name: String,

    /// The step being executed (empty for the run-level context)
    pub step_name: String,

    /// 1-based attempt number
    pub attempt: usize,

    /// Outputs from completed steps (step name -> stdout)
    pub step_outputs: HashMap<String, String>,
}

impl StepContext {
    /// Create the run-level context
    pub fn new(run_id: Uuid, pipeline_name: &str) -> Self {
        Self {
            run_id,
            pipeline_name: pipeline_name.to_string(),
            step_name: String::new(),
            attempt: 0,
            step_outputs: HashMap::new(),
        }
    }

    /// Derive the context for one attempt of a step
    pub fn for_step(&self, step_name: &str, attempt: usize) -> Self {
        Self {
            step_name: step_name.to_string(),
            attempt,
            ..self.clone()
        }
    }

    /// Set the output of a step
    pub fn set_step_output(&mut self, step_name: &str, output: String) {
        self.step_outputs.insert(step_name.to_string(), output);
    }

    /// Get the output of a step
    pub fn get_step_output(&self, step_name: &str) -> Option<&String> {
        self.step_outputs.get(step_name)
    }

    /// Short run identifier used in log lines and resource names
    pub fn short_run_id(&self) -> String {
        self.run_id.simple().to_string()[..8].to_string()
    }

    /// Name for a resource that belongs to this attempt, e.g. a container
    ///
    /// Only `[A-Za-z0-9_.-]` survive; anything else becomes `-`.
    pub fn resource_name(&self) -> String {
        let raw = format!(
            "{}-{}-{}-try{}",
            self.pipeline_name,
            self.step_name,
            self.short_run_id(),
            self.attempt
        );
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }
}
