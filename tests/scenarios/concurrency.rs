//! Test: Concurrency - max active runs per pipeline

use crate::helpers::*;
use elt_pipeline::core::ExecutionStatus;
use elt_pipeline::execution::SchedulerError;
use std::time::Duration;

/// A second trigger while a run is in flight is rejected, not queued
#[tokio::test]
async fn test_second_trigger_rejected() {
    let fixture = Fixture::new(vec![ProcessBehavior::Hang], vec![]);
    let scheduler = fixture.scheduler().await;

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.trigger("elt_and_dbt").await })
    };
    let run_id = wait_for_active_run(&scheduler, "elt_and_dbt").await;

    match scheduler.trigger("elt_and_dbt").await {
        Err(SchedulerError::MaxActiveRuns { name, limit }) => {
            assert_eq!(name, "elt_and_dbt");
            assert_eq!(limit, 1);
        }
        other => panic!("Expected MaxActiveRuns, got {:?}", other.map(|r| r.status())),
    }

    // Free the slot and make sure the next trigger goes through
    assert!(scheduler.cancel(run_id).await);
    let first = tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.status(), ExecutionStatus::Failed);

    let second = scheduler.trigger("elt_and_dbt").await.unwrap();
    assert_eq!(second.status(), ExecutionStatus::Succeeded);
}

/// A higher cap lets runs overlap
#[tokio::test]
async fn test_higher_cap_allows_overlap() {
    let fixture = Fixture::new(vec![ProcessBehavior::Hang, ProcessBehavior::Hang], vec![]);
    let mut config = fixture.config();
    config.max_active_runs = 2;

    let scheduler = elt_pipeline::execution::Scheduler::new(
        elt_pipeline::execution::ExecutionEngine::new(),
    );
    scheduler
        .register(config.build(&fixture.host, &fixture.runtime()).unwrap())
        .await
        .unwrap();
    let scheduler = std::sync::Arc::new(scheduler);

    let mut handles = Vec::new();
    for _ in 0..2 {
        let scheduler = scheduler.clone();
        handles.push(tokio::spawn(async move {
            scheduler.trigger("elt_and_dbt").await
        }));
    }

    for _ in 0..200 {
        if scheduler.active_runs("elt_and_dbt").await.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(scheduler.active_runs("elt_and_dbt").await.len(), 2);

    assert!(matches!(
        scheduler.trigger("elt_and_dbt").await,
        Err(SchedulerError::MaxActiveRuns { limit: 2, .. })
    ));

    assert_eq!(scheduler.cancel_all().await, 2);
    for handle in handles {
        let run = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(run.status(), ExecutionStatus::Failed);
    }
}
