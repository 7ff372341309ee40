//! Scenario-based tests for elt-pipeline

#[allow(dead_code)]
mod helpers;

mod cancellation;
mod concurrency;
mod failure_handling;
mod retry_behavior;
mod success_chain;
