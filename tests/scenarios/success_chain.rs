//! Test: Success Chain - extract/load then transform

use crate::helpers::*;
use elt_pipeline::core::{PipelineConfig, StepStatus};
use elt_pipeline::runtime::{Mount, MountMode};
use std::time::Duration;

/// The full happy path: script exits 0, container exits 0
#[tokio::test]
async fn test_end_to_end_success() {
    let fixture = Fixture::new(
        vec![ProcessBehavior::ok("42 rows loaded\n")],
        vec![ContainerBehavior::exit(0)],
    );

    let run = fixture.run().await;

    assert_run_succeeded(&run);
    assert_result_order(&run, &["run_elt_script", "dbt_run"]);
    assert_eq!(run.output_of("run_elt_script"), Some("42 rows loaded\n"));
    assert_step_status(&run, "dbt_run", StepStatus::Succeeded);
    assert!(run.finished_at().is_some());

    // The script ran through the interpreter with the configured timeout
    let calls = fixture.runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, "python");
    assert_eq!(calls[0].args, vec![fixture.script.display().to_string()]);
    assert_eq!(calls[0].timeout, Some(Duration::from_secs(300)));

    // The container got both bind mounts and the profiles env
    let launched = fixture.engine.launched();
    assert_eq!(launched.len(), 1);
    let spec = &launched[0];
    assert_eq!(spec.image, "python:3.9-slim");
    assert_eq!(spec.network_mode.as_deref(), Some("elt_elt_network"));
    assert!(!spec.auto_remove);
    assert_eq!(
        spec.mounts,
        vec![
            Mount::bind(fixture.dir.path().join("custom_postgres"), "/dbt"),
            Mount::bind(fixture.dir.path().join(".dbt"), "/home/airflow/.dbt"),
        ]
    );
    assert_eq!(spec.mounts[1].mode, MountMode::ReadWrite);
    assert_eq!(
        spec.env.get("DBT_PROFILES_DIR").map(String::as_str),
        Some("/home/airflow/.dbt")
    );
    assert!(spec.name.starts_with("elt_and_dbt-dbt_run-"));
    assert!(spec.name.ends_with("-try1"));
}

/// Step results carry exact captured output and exit codes
#[tokio::test]
async fn test_results_record_exact_output() {
    let fixture = Fixture::new(
        vec![ProcessBehavior::Exit {
            code: 0,
            stdout: "extracted 10\nloaded 10\n".to_string(),
            stderr: "warning: slow network\n".to_string(),
        }],
        vec![ContainerBehavior::exit(0)],
    );

    let run = fixture.run().await;
    assert_run_succeeded(&run);

    let load = run.final_result("run_elt_script").unwrap();
    assert_eq!(load.stdout(), "extracted 10\nloaded 10\n");
    assert_eq!(load.stderr(), "warning: slow network\n");
    assert_eq!(load.exit_code(), Some(0));
    assert_eq!(load.attempt(), 1);
    assert!(load.started_at().is_some());
    assert!(load.error().is_none());
}

/// Pipelines loaded from YAML run the same way as the built-in one
#[tokio::test]
async fn test_yaml_pipeline_runs() {
    let fixture = Fixture::new(vec![ProcessBehavior::ok("ok")], vec![]);
    let yaml = format!(
        r#"
name: nightly_load
default_args:
  retries: 0
steps:
  - kind: process
    id: load
    interpreter: python3
    script: "{script}"
    timeout_secs: 60
  - kind: container
    id: transform
    image: ghcr.io/dbt-labs/dbt-postgres:1.4.7
    mounts:
      - source: "{{{{ host_project_path }}}}/custom_postgres"
        target: /dbt
        mode: ro
    command: ["dbt", "run"]
"#,
        script = fixture.script.display()
    );

    let config = PipelineConfig::from_yaml(&yaml).unwrap();
    let run = fixture.run_config(config).await;

    assert_result_order(&run, &["load", "transform"]);
    assert_run_succeeded(&run);
    assert_eq!(fixture.runner.calls()[0].program, "python3");
    let launched = fixture.engine.launched();
    assert_eq!(launched[0].image, "ghcr.io/dbt-labs/dbt-postgres:1.4.7");
    assert_eq!(launched[0].mounts[0].mode, MountMode::ReadOnly);
    assert_eq!(launched[0].command, vec!["dbt", "run"]);
}
