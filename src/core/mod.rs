//! Core domain models for the ELT pipeline
//!
//! This module defines the pipeline, its steps, run state and the
//! configuration the pipeline is built from.

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod state;
pub mod step;

pub use config::{HostPaths, PipelineConfig, StepConfig};
pub use context::*;
pub use error::StepError;
pub use pipeline::*;
pub use state::*;
pub use step::*;
