//! Reconciling a run nothing happened to

use crate::helpers::*;
use pipeline_scheduler::core::ExecutionStatus;
use pipeline_scheduler::execution::ReconcileOutcome;
use pipeline_scheduler::persistence::RunStore;
use tokio::sync::broadcast::error::TryRecvError;

/// Test that repeated passes over an unchanged run write nothing
#[tokio::test]
async fn test_unchanged_run_is_not_written() {
    let harness = Harness::new(diamond()).await;
    harness.pass().await;
    let before = harness.record().await;
    let events_before = harness.events().len();
    let mut watch = harness.store.watch();

    assert_eq!(harness.pass().await, ReconcileOutcome::Unchanged);
    assert_eq!(harness.pass().await, ReconcileOutcome::Unchanged);

    assert_eq!(harness.record().await, before);
    assert_eq!(harness.backend.launch_calls(), 1);
    assert_eq!(harness.events().len(), events_before);
    assert!(matches!(watch.try_recv(), Err(TryRecvError::Empty)));
}

/// Test that a duplicate completion report doesn't wake the run again
#[tokio::test]
async fn test_duplicate_report_is_ignored() {
    let harness = Harness::new(diamond()).await;
    harness.pass().await;
    harness.complete("1", ExecutionStatus::Succeeded).await;
    harness.pass().await;
    let version = harness.record().await.version;

    harness.complete("1", ExecutionStatus::Succeeded).await;

    assert_eq!(harness.record().await.version, version);
    assert_eq!(harness.pass().await, ReconcileOutcome::Unchanged);
    assert_eq!(harness.backend.starts("2a"), 1);
}
