//! Test: Cancellation - in-flight runs can be stopped

use crate::helpers::*;
use elt_pipeline::core::{ExecutionStatus, StepStatus};
use elt_pipeline::persistence::{InMemoryPersistence, PersistenceBackend};
use std::sync::Arc;
use std::time::Duration;

/// Cancelling during the script fails the run and skips the transform
#[tokio::test]
async fn test_cancel_during_extract() {
    let fixture = Fixture::new(vec![ProcessBehavior::Hang], vec![]);
    let scheduler = fixture.scheduler().await;

    let handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.trigger("elt_and_dbt").await })
    };
    let run_id = wait_for_active_run(&scheduler, "elt_and_dbt").await;
    assert!(scheduler.cancel(run_id).await);

    let run = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_run_failed(&run);
    assert_eq!(run.run_id(), run_id);
    let load = run.final_result("run_elt_script").unwrap();
    assert_eq!(load.status(), StepStatus::Failed);
    assert_eq!(load.error(), Some("Step cancelled"));
    assert_step_status(&run, "dbt_run", StepStatus::NotAttempted);
    assert!(fixture.engine.launched().is_empty());
    assert!(scheduler.active_runs("elt_and_dbt").await.is_empty());
}

/// Cancelling during the transform kills the attempt's container
#[tokio::test]
async fn test_cancel_during_transform_kills_container() {
    let fixture = Fixture::new(
        vec![ProcessBehavior::ok("42 rows loaded")],
        vec![ContainerBehavior::Hang],
    );
    let scheduler = fixture.scheduler().await;

    let handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.trigger("elt_and_dbt").await })
    };

    for _ in 0..200 {
        if !fixture.engine.launched().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let launched = fixture.engine.launched();
    assert_eq!(launched.len(), 1);

    assert_eq!(scheduler.cancel_all().await, 1);
    let run = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_run_failed(&run);
    assert_step_status(&run, "run_elt_script", StepStatus::Succeeded);
    assert_step_status(&run, "dbt_run", StepStatus::Failed);
    assert_eq!(fixture.engine.killed(), vec![launched[0].name.clone()]);
}

/// History sees the run as running while it is in flight and failed afterwards
#[tokio::test]
async fn test_history_tracks_cancelled_run() {
    let fixture = Fixture::new(vec![ProcessBehavior::Hang], vec![]);
    let store = Arc::new(InMemoryPersistence::new());
    let scheduler = elt_pipeline::execution::Scheduler::new(
        elt_pipeline::execution::ExecutionEngine::new(),
    )
    .with_store(store.clone());
    scheduler.register(fixture.pipeline()).await.unwrap();
    let scheduler = Arc::new(scheduler);

    let handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.trigger("elt_and_dbt").await })
    };
    let run_id = wait_for_active_run(&scheduler, "elt_and_dbt").await;

    // The first save happens before the script is spawned
    for _ in 0..200 {
        if !fixture.runner.calls().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let in_flight = store.load_run(run_id).await.unwrap().unwrap();
    assert_eq!(in_flight.status(), ExecutionStatus::Running);

    scheduler.cancel(run_id).await;
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let finished = store.latest_run("elt_and_dbt").await.unwrap().unwrap();
    assert_eq!(finished.run_id(), run_id);
    assert_eq!(finished.status(), ExecutionStatus::Failed);
    assert_eq!(finished.results().len(), 2);
}

/// Giving up on a trigger stops the run and kills its container
#[tokio::test]
async fn test_abandoned_trigger_kills_container() {
    let fixture = Fixture::new(
        vec![ProcessBehavior::ok("42 rows loaded")],
        vec![ContainerBehavior::Hang],
    );
    let scheduler = fixture.scheduler().await;

    let abandoned =
        tokio::time::timeout(Duration::from_millis(200), scheduler.trigger("elt_and_dbt")).await;
    assert!(abandoned.is_err());
    assert!(scheduler.active_runs("elt_and_dbt").await.is_empty());
    assert_eq!(scheduler.cancel_all().await, 0);

    for _ in 0..200 {
        if !fixture.engine.killed().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let launched = fixture.engine.launched();
    assert_eq!(launched.len(), 1);
    assert_eq!(fixture.engine.killed(), vec![launched[0].name.clone()]);

    // The slot frees up once the cancelled run has wound down
    let mut next = None;
    for _ in 0..200 {
        match scheduler.trigger("elt_and_dbt").await {
            Ok(run) => {
                next = Some(run);
                break;
            }
            Err(elt_pipeline::execution::SchedulerError::MaxActiveRuns { .. }) => {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(e) => panic!("unexpected trigger error: {}", e),
        }
    }
    assert_eq!(next.unwrap().status(), ExecutionStatus::Succeeded);
}
