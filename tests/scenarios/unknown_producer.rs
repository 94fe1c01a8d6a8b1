//! Pipelines whose graph can't be built

use crate::helpers::*;
use pipeline_scheduler::core::{PipelineDefinition, PipelineTask, RunCondition};
use pipeline_scheduler::execution::{ReconcileEvent, ReconcileOutcome};

/// Test that a dependency on a task outside the pipeline fails the run
#[tokio::test]
async fn test_unknown_producer_fails_run_without_launching() {
    let pipeline = PipelineDefinition::new(
        "broken",
        vec![
            PipelineTask::new("a", "noop"),
            PipelineTask::new("b", "noop").with_dependency("workspace", &["ghost"]),
        ],
    );
    let harness = Harness::new(pipeline).await;

    let outcome = harness.pass().await;

    assert!(matches!(outcome, ReconcileOutcome::Updated { .. }));
    assert!(harness.backend.launched().is_empty());

    let record = harness.record().await;
    assert_eq!(record.condition, RunCondition::Failed);
    assert_message_contains(&record, "ghost");
    assert!(record.tasks.is_empty());
    assert!(harness.events().iter().any(|e| matches!(
        e,
        ReconcileEvent::RunCompleted { condition: RunCondition::Failed, .. }
    )));
}

/// Test that a cycle fails the run with the cycle path
#[tokio::test]
async fn test_cycle_fails_run() {
    let pipeline = PipelineDefinition::new(
        "loop",
        vec![
            PipelineTask::new("a", "noop").with_dependency("r", &["b"]),
            PipelineTask::new("b", "noop").with_dependency("r", &["a"]),
        ],
    );
    let harness = Harness::new(pipeline).await;

    harness.pass().await;

    assert!(harness.backend.launched().is_empty());
    let record = harness.record().await;
    assert_eq!(record.condition, RunCondition::Failed);
    assert_message_contains(&record, "cycle");
}
