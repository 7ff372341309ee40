//! Test: Failure Handling - a failed step stops the chain

use crate::helpers::*;
use elt_pipeline::core::StepStatus;

/// A missing script spawns nothing and never reaches the container
#[tokio::test]
async fn test_missing_script() {
    let fixture = Fixture::new(vec![], vec![]);
    std::fs::remove_file(&fixture.script).unwrap();

    let run = fixture.run_config(fixture.config_without_retries()).await;

    assert_run_failed(&run);
    assert!(fixture.runner.calls().is_empty(), "No process may be spawned");
    assert!(fixture.engine.launched().is_empty());

    let load = run.final_result("run_elt_script").unwrap();
    assert_eq!(load.status(), StepStatus::Failed);
    assert!(load.error().unwrap().contains("ELT script not found"));
    assert_eq!(load.exit_code(), None);
    assert_step_status(&run, "dbt_run", StepStatus::NotAttempted);
}

/// A non-zero exit carries the code and stderr, and blocks the transform
#[tokio::test]
async fn test_script_non_zero_exit() {
    let fixture = Fixture::new(
        vec![ProcessBehavior::exit(3, "psycopg2.OperationalError: connection refused")],
        vec![],
    );

    let run = fixture.run_config(fixture.config_without_retries()).await;

    assert_run_failed(&run);
    assert_result_order(&run, &["run_elt_script", "dbt_run"]);

    let load = run.final_result("run_elt_script").unwrap();
    assert_eq!(load.status(), StepStatus::Failed);
    assert_eq!(load.exit_code(), Some(3));
    assert_eq!(load.stderr(), "psycopg2.OperationalError: connection refused");
    let error = load.error().unwrap();
    assert!(error.contains("return code 3"));
    assert!(error.contains("connection refused"));

    assert!(fixture.engine.launched().is_empty(), "Transform must not launch");
    assert_step_status(&run, "dbt_run", StepStatus::NotAttempted);
    assert_eq!(run.attempts("dbt_run"), 0);
}

/// A timeout is reported as such, not as a non-zero exit
#[tokio::test]
async fn test_script_timeout() {
    let fixture = Fixture::new(vec![ProcessBehavior::Timeout], vec![]);

    let run = fixture.run_config(fixture.config_without_retries()).await;

    assert_run_failed(&run);
    let load = run.final_result("run_elt_script").unwrap();
    assert_eq!(load.status(), StepStatus::TimedOut);
    assert_eq!(load.exit_code(), None);
    assert!(load.error().unwrap().contains("timed out"));
    assert!(fixture.engine.launched().is_empty());
}

/// Container exit 1 fails the run and surfaces the status
#[tokio::test]
async fn test_container_exit_failure() {
    let fixture = Fixture::new(
        vec![ProcessBehavior::ok("42 rows loaded")],
        vec![ContainerBehavior::Exit {
            code: 1,
            stderr: "Database Error in model customers".to_string(),
        }],
    );

    let run = fixture.run_config(fixture.config_without_retries()).await;

    assert_run_failed(&run);
    assert_step_status(&run, "run_elt_script", StepStatus::Succeeded);

    let transform = run.final_result("dbt_run").unwrap();
    assert_eq!(transform.status(), StepStatus::Failed);
    assert_eq!(transform.exit_code(), Some(1));
    assert_eq!(transform.stderr(), "Database Error in model customers");
    assert!(transform.error().unwrap().contains("status 1"));
}

/// An unreachable engine is a launch failure with no exit code
#[tokio::test]
async fn test_container_launch_failure() {
    let fixture = Fixture::new(
        vec![ProcessBehavior::ok("42 rows loaded")],
        vec![ContainerBehavior::LaunchError(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock".to_string(),
        )],
    );

    let run = fixture.run_config(fixture.config_without_retries()).await;

    assert_run_failed(&run);
    let transform = run.final_result("dbt_run").unwrap();
    assert_eq!(transform.status(), StepStatus::Failed);
    assert_eq!(transform.exit_code(), None);
    assert!(transform.error().unwrap().contains("Container launch failed"));
}
