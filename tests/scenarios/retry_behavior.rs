//! Test: Retry Behavior - failed attempts are retried per policy

use crate::helpers::*;
use elt_pipeline::core::StepStatus;

/// Fail once, then succeed: two results and a successful run
#[tokio::test]
async fn test_retry_then_succeed() {
    let fixture = Fixture::new(
        vec![
            ProcessBehavior::exit(1, "deadlock detected"),
            ProcessBehavior::ok("42 rows loaded"),
        ],
        vec![ContainerBehavior::exit(0)],
    );

    let run = fixture.run().await;

    assert_run_succeeded(&run);
    assert_result_order(&run, &["run_elt_script", "run_elt_script", "dbt_run"]);

    let attempts: Vec<_> = run
        .results_for("run_elt_script")
        .map(|r| (r.attempt(), r.status()))
        .collect();
    assert_eq!(
        attempts,
        vec![(1, StepStatus::Failed), (2, StepStatus::Succeeded)]
    );
    assert_eq!(fixture.runner.calls().len(), 2);
    assert_eq!(run.output_of("run_elt_script"), Some("42 rows loaded"));
}

/// `retries + 1` failures exhaust the policy and fail the run
#[tokio::test]
async fn test_retries_exhausted() {
    let fixture = Fixture::new(
        vec![
            ProcessBehavior::exit(1, "first"),
            ProcessBehavior::exit(1, "second"),
        ],
        vec![],
    );

    let run = fixture.run().await;

    assert_run_failed(&run);
    assert_eq!(run.attempts("run_elt_script"), 2);
    assert_eq!(run.final_result("run_elt_script").unwrap().stderr(), "second");
    assert_step_status(&run, "dbt_run", StepStatus::NotAttempted);
    assert!(fixture.engine.launched().is_empty());
}

/// Each container attempt gets its own name
#[tokio::test]
async fn test_container_retry_uses_fresh_name() {
    let fixture = Fixture::new(
        vec![ProcessBehavior::ok("loaded")],
        vec![ContainerBehavior::exit(2), ContainerBehavior::exit(0)],
    );

    let run = fixture.run().await;

    assert_run_succeeded(&run);
    let launched = fixture.engine.launched();
    assert_eq!(launched.len(), 2);
    assert!(launched[0].name.ends_with("-try1"));
    assert!(launched[1].name.ends_with("-try2"));
    assert_eq!(run.attempts("dbt_run"), 2);
}

/// A per-step override beats the pipeline default
#[tokio::test]
async fn test_per_step_retry_override() {
    let fixture = Fixture::new(
        vec![
            ProcessBehavior::exit(1, "1"),
            ProcessBehavior::exit(1, "2"),
            ProcessBehavior::ok("third time lucky"),
        ],
        vec![],
    );

    let mut config = fixture.config();
    if let elt_pipeline::core::StepConfig::Process(load) = &mut config.steps[0] {
        load.retries = Some(2);
    }

    let run = fixture.run_config(config).await;

    assert_run_succeeded(&run);
    assert_eq!(run.attempts("run_elt_script"), 3);
}
