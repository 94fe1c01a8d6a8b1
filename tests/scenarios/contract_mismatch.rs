//! Tasks whose supplied params don't match their contract

use crate::helpers::*;
use pipeline_scheduler::core::{
    Catalog, ExecutionStatus, PipelineDefinition, PipelineRunSpec, PipelineTask, RunCondition,
    TaskContract, TaskState,
};
use pipeline_scheduler::execution::{ReconcileEvent, ReconcileOutcome};

fn sleep_catalog() -> Catalog {
    let mut catalog = Catalog::default();
    catalog.add_task(TaskContract::new("sleep").with_param("sleep-sec"));
    catalog
}

async fn harness(tasks: Vec<PipelineTask>) -> Harness {
    let pipeline = PipelineDefinition::new("sleepers", tasks);
    let spec = PipelineRunSpec::new(RUN_ID, "sleepers");
    Harness::with(pipeline, spec, sleep_catalog(), |r| r).await
}

/// Test that a missing param fails the task while its sibling still launches
#[tokio::test]
async fn test_missing_param_rejects_task_but_not_sibling() {
    let harness = harness(vec![
        PipelineTask::new("a", "sleep"),
        PipelineTask::new("b", "sleep").with_param("sleep-sec", "1"),
    ])
    .await;

    harness.pass().await;

    assert_launched(&harness.backend, &["b"]);
    let record = harness.record().await;
    assert_task_state(&record, "a", TaskState::Failed);
    assert_task_state(&record, "b", TaskState::Running);
    assert!(record.tasks["a"]
        .message
        .as_deref()
        .is_some_and(|m| m.contains("sleep-sec")));
    assert!(harness.events().iter().any(|e| matches!(
        e,
        ReconcileEvent::TaskRejected { task, reason, .. } if task == "a" && reason.contains("sleep-sec")
    )));
}

/// Test that the next pass fails the run and leaves the sibling running
#[tokio::test]
async fn test_rejection_fails_run_on_next_pass() {
    let harness = harness(vec![
        PipelineTask::new("a", "sleep"),
        PipelineTask::new("b", "sleep").with_param("sleep-sec", "1"),
    ])
    .await;
    harness.pass().await;

    harness.pass().await;

    let record = harness.record().await;
    assert_eq!(record.condition, RunCondition::Failed);
    assert_message_contains(&record, "task 'a' failed");
    assert!(harness.backend.cancelled().is_empty());
    assert_task_state(&record, "b", TaskState::Running);

    // The sibling still gets to report, but the run stays failed
    harness.complete("b", ExecutionStatus::Succeeded).await;
    assert_eq!(harness.pass().await, ReconcileOutcome::Terminal);
    let record = harness.record().await;
    assert_task_state(&record, "b", TaskState::Succeeded);
    assert_eq!(record.condition, RunCondition::Failed);
}

/// Test that a param the contract doesn't declare is rejected
#[tokio::test]
async fn test_unexpected_param_rejected() {
    let harness = harness(vec![PipelineTask::new("a", "sleep")
        .with_param("sleep-sec", "1")
        .with_param("color", "blue")])
    .await;

    harness.pass().await;

    assert!(harness.backend.launched().is_empty());
    let record = harness.record().await;
    assert!(record.tasks["a"]
        .message
        .as_deref()
        .is_some_and(|m| m.contains("color")));
}

/// Test that a task pointing at an unknown template is rejected
#[tokio::test]
async fn test_unknown_task_template_rejected() {
    let harness = harness(vec![PipelineTask::new("a", "does-not-exist")]).await;

    harness.pass().await;
    harness.pass().await;

    assert!(harness.backend.launched().is_empty());
    let record = harness.record().await;
    assert_eq!(record.condition, RunCondition::Failed);
    assert_message_contains(&record, "does-not-exist");
}
