//! Fan-out and join over a diamond-shaped pipeline

use crate::helpers::*;
use pipeline_scheduler::core::{ExecutionStatus, RunCondition, TaskState};
use pipeline_scheduler::execution::{ReconcileEvent, ReconcileOutcome, SchedulingStrategy};

/// Test that only the root starts on the first pass
#[tokio::test]
async fn test_first_pass_launches_root_only() {
    let harness = Harness::new(diamond()).await;

    let outcome = harness.pass().await;

    assert!(matches!(outcome, ReconcileOutcome::Updated { .. }));
    assert_launched(&harness.backend, &["1"]);

    let record = harness.record().await;
    assert_eq!(record.condition, RunCondition::Running);
    assert!(record.started_at.is_some());
    assert_task_state(&record, "1", TaskState::Running);
    assert_task_state(&record, "2a", TaskState::NotStarted);

    let events = harness.events();
    assert!(matches!(&events[0], ReconcileEvent::RunStarted { pipeline_name, .. } if pipeline_name == "diamond"));
    assert!(events
        .iter()
        .any(|e| matches!(e, ReconcileEvent::TaskLaunched { task, .. } if task == "1")));
}

/// Test that both branches launch in the same pass once the root succeeds
#[tokio::test]
async fn test_branches_launch_together() {
    let harness = Harness::new(diamond()).await;
    harness.pass().await;

    harness.complete("1", ExecutionStatus::Succeeded).await;
    harness.pass().await;

    assert_launched(&harness.backend, &["1", "2a", "2b"]);
    let record = harness.record().await;
    assert_task_state(&record, "2a", TaskState::Running);
    assert_task_state(&record, "2b", TaskState::Running);
    assert_task_state(&record, "3", TaskState::NotStarted);
}

/// Test that the join task waits for every producer
#[tokio::test]
async fn test_join_waits_for_every_producer() {
    let harness = Harness::new(diamond()).await;
    harness.pass().await;
    harness.complete("1", ExecutionStatus::Succeeded).await;
    harness.pass().await;

    harness.complete("2a", ExecutionStatus::Succeeded).await;
    harness.pass().await;
    assert_eq!(harness.backend.starts("3"), 0, "3 must wait for 2b");

    harness.complete("2b", ExecutionStatus::Succeeded).await;
    harness.pass().await;
    assert_eq!(harness.backend.starts("3"), 1);
    assert_eq!(harness.record().await.condition, RunCondition::Running);
}

/// Test that the run succeeds after the last task
#[tokio::test]
async fn test_run_succeeds_after_last_task() {
    let harness = Harness::new(diamond()).await;
    harness.pass().await;
    harness.complete("1", ExecutionStatus::Succeeded).await;
    harness.pass().await;
    harness.complete("2a", ExecutionStatus::Succeeded).await;
    harness.complete("2b", ExecutionStatus::Succeeded).await;
    harness.pass().await;
    harness.complete("3", ExecutionStatus::Succeeded).await;

    harness.pass().await;

    let record = harness.record().await;
    assert_eq!(record.condition, RunCondition::Succeeded);
    assert!(record.completed_at.is_some());
    assert_eq!(record.count(TaskState::Succeeded), 4);
    assert!(harness.events().iter().any(|e| matches!(
        e,
        ReconcileEvent::RunCompleted { condition: RunCondition::Succeeded, .. }
    )));

    assert_eq!(harness.pass().await, ReconcileOutcome::Terminal);
}

/// Test that the sequential strategy starts one ready task at a time
#[tokio::test]
async fn test_sequential_strategy_serializes_branches() {
    let pipeline = diamond();
    let spec = pipeline_scheduler::core::PipelineRunSpec::new(RUN_ID, &pipeline.name);
    let harness = Harness::with(pipeline, spec, noop_catalog(), |r| {
        r.with_strategy(SchedulingStrategy::Sequential)
    })
    .await;

    harness.pass().await;
    harness.complete("1", ExecutionStatus::Succeeded).await;
    harness.pass().await;
    assert_eq!(harness.backend.launched().len(), 2, "one branch at a time");

    // Nothing new while the branch is still running
    harness.pass().await;
    assert_eq!(harness.backend.launched().len(), 2);

    let branch = harness.backend.launched()[1].clone();
    harness.complete(&branch, ExecutionStatus::Succeeded).await;
    harness.pass().await;
    assert_launched(&harness.backend, &["1", "2a", "2b"]);
}
