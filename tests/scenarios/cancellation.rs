//! Cancelling and deleting runs in flight

use crate::helpers::*;
use async_trait::async_trait;
use pipeline_scheduler::core::{
    Catalog, ExecutionHandle, ExecutionStatus, PipelineDefinition, PipelineRunSpec, PipelineTask,
    RunCondition, TaskState,
};
use pipeline_scheduler::execution::{
    FailurePolicy, GraphCache, ReconcileEvent, ReconcileOutcome, Reconciler,
};
use pipeline_scheduler::persistence::{
    InMemoryRunStore, RunRecord, RunStore, StatusReporter, StoreError,
};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// A change that lands between a pass's launches and its write
enum Interruption {
    Cancel,
    Fail(&'static str),
}

/// Store that applies an interruption right before the next write
struct InterruptedStore {
    inner: InMemoryRunStore,
    before_put: Mutex<Option<Interruption>>,
}

impl InterruptedStore {
    async fn new(pipeline: PipelineDefinition) -> Arc<Self> {
        let inner = InMemoryRunStore::new(noop_catalog());
        let spec = PipelineRunSpec::new(RUN_ID, &pipeline.name);
        inner.create_run(spec, pipeline).await.unwrap();
        Arc::new(Self {
            inner,
            before_put: Mutex::new(None),
        })
    }

    fn arm(&self, interruption: Interruption) {
        *self.before_put.lock().unwrap() = Some(interruption);
    }
}

#[async_trait]
impl RunStore for InterruptedStore {
    async fn get(&self, run_id: &str) -> Result<RunRecord, StoreError> {
        self.inner.get(run_id).await
    }

    async fn put(&self, record: &RunRecord) -> Result<u64, StoreError> {
        let interruption = self.before_put.lock().unwrap().take();
        match interruption {
            Some(Interruption::Cancel) => self.inner.cancel_run(&record.run_id).await?,
            Some(Interruption::Fail(task)) => {
                let handle = ExecutionHandle::for_task(&record.run_id, task);
                self.inner
                    .report(&record.run_id, task, &handle, ExecutionStatus::Failed, None)
                    .await?
            }
            None => {}
        }
        self.inner.put(record).await
    }

    fn watch(&self) -> broadcast::Receiver<String> {
        self.inner.watch()
    }

    async fn list_runs(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_runs().await
    }

    async fn catalog(&self) -> Result<Arc<Catalog>, StoreError> {
        self.inner.catalog().await
    }

    async fn cancel_run(&self, run_id: &str) -> Result<(), StoreError> {
        self.inner.cancel_run(run_id).await
    }

    async fn delete_run(&self, run_id: &str) -> Result<(), StoreError> {
        self.inner.delete_run(run_id).await
    }
}

fn interrupted_reconciler(store: Arc<InterruptedStore>, backend: Arc<MockBackend>) -> Reconciler {
    Reconciler::new(store, backend, Arc::new(GraphCache::new(8)))
}

/// Test that cancelling a run tears down every unfinished task
#[tokio::test]
async fn test_cancel_tears_down_running_tasks() {
    let harness = Harness::new(diamond()).await;
    harness.pass().await;
    harness.complete("1", ExecutionStatus::Succeeded).await;
    harness.pass().await;

    harness.store.cancel_run(RUN_ID).await.unwrap();
    harness.pass().await;

    let mut cancelled = harness.backend.cancelled();
    cancelled.sort();
    assert_eq!(
        cancelled,
        vec![
            ExecutionHandle::for_task(RUN_ID, "2a"),
            ExecutionHandle::for_task(RUN_ID, "2b"),
            ExecutionHandle::for_task(RUN_ID, "3"),
        ]
    );

    let record = harness.record().await;
    assert_eq!(record.condition, RunCondition::Cancelled);
    assert_task_state(&record, "1", TaskState::Succeeded);
    assert_task_state(&record, "2a", TaskState::Failed);
    assert_task_state(&record, "3", TaskState::NotStarted);

    let events = harness.events();
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, ReconcileEvent::TaskCancelled { .. }))
            .count(),
        2
    );
}

/// Test that a cancelled run launches nothing more
#[tokio::test]
async fn test_cancelled_run_stays_put() {
    let harness = Harness::new(diamond()).await;
    harness.pass().await;
    harness.store.cancel_run(RUN_ID).await.unwrap();
    harness.pass().await;

    // A late report from the torn-down task changes nothing
    harness.complete("1", ExecutionStatus::Succeeded).await;
    assert_eq!(harness.pass().await, ReconcileOutcome::Terminal);

    let record = harness.record().await;
    assert_eq!(record.condition, RunCondition::Cancelled);
    assert_task_state(&record, "1", TaskState::Failed);
    assert_launched(&harness.backend, &["1"]);
}

/// Test that cancelling before the first pass launches nothing
#[tokio::test]
async fn test_cancel_before_start() {
    let harness = Harness::new(diamond()).await;
    harness.store.cancel_run(RUN_ID).await.unwrap();

    harness.pass().await;

    assert!(harness.backend.launched().is_empty());
    assert_eq!(harness.record().await.condition, RunCondition::Cancelled);
}

/// Test that deleting a running run cancels it and then removes it
#[tokio::test]
async fn test_delete_running_run() {
    let harness = Harness::new(diamond()).await;
    harness.pass().await;

    harness.store.delete_run(RUN_ID).await.unwrap();
    harness.pass().await;

    let mut cancelled = harness.backend.cancelled();
    cancelled.sort();
    assert_eq!(
        cancelled,
        ["1", "2a", "2b", "3"]
            .iter()
            .map(|t| ExecutionHandle::for_task(RUN_ID, t))
            .collect::<Vec<_>>()
    );
    assert_eq!(
        harness.store.get(RUN_ID).await.unwrap_err(),
        StoreError::NotFound(RUN_ID.to_string())
    );
    assert_eq!(harness.pass().await, ReconcileOutcome::Missing);
}

/// Test that a task launched by a pass whose write lost to a cancel is torn down
#[tokio::test]
async fn test_cancel_between_launch_and_write() {
    let pipeline = PipelineDefinition::new("single", vec![PipelineTask::new("a", "noop")]);
    let store = InterruptedStore::new(pipeline).await;
    let backend = Arc::new(MockBackend::new());
    let reconciler = interrupted_reconciler(store.clone(), backend.clone());

    store.arm(Interruption::Cancel);
    reconciler.reconcile(RUN_ID).await.unwrap();

    assert_eq!(backend.starts("a"), 1);
    assert_eq!(
        backend.cancelled(),
        vec![ExecutionHandle::for_task(RUN_ID, "a")]
    );
    let record = store.get(RUN_ID).await.unwrap();
    assert_eq!(record.condition, RunCondition::Cancelled);
    assert!(record.tasks.is_empty());

    // The torn-down execution's late report is neither applied nor held
    store
        .inner
        .report(
            RUN_ID,
            "a",
            &ExecutionHandle::for_task(RUN_ID, "a"),
            ExecutionStatus::Succeeded,
            None,
        )
        .await
        .unwrap();
    assert!(store.get(RUN_ID).await.unwrap().tasks.is_empty());
}

/// Test that a failure landing between launch and write still tears the launch down
#[tokio::test]
async fn test_failure_between_launch_and_write_cancels_launch() {
    // a and x run side by side, b waits on a
    let pipeline = PipelineDefinition::new(
        "late-failure",
        vec![
            PipelineTask::new("a", "noop"),
            PipelineTask::new("x", "noop"),
            PipelineTask::new("b", "noop").with_dependency("out", &["a"]),
        ],
    );
    let store = InterruptedStore::new(pipeline).await;
    let backend = Arc::new(MockBackend::new());
    let reconciler = interrupted_reconciler(store.clone(), backend.clone())
        .with_failure_policy(FailurePolicy::CancelRunning);

    reconciler.reconcile(RUN_ID).await.unwrap();
    store
        .inner
        .report(
            RUN_ID,
            "a",
            &ExecutionHandle::for_task(RUN_ID, "a"),
            ExecutionStatus::Succeeded,
            None,
        )
        .await
        .unwrap();

    // The pass launching b loses its write to x failing
    store.arm(Interruption::Fail("x"));
    reconciler.reconcile(RUN_ID).await.unwrap();

    assert_eq!(backend.starts("b"), 1);
    assert!(backend
        .cancelled()
        .contains(&ExecutionHandle::for_task(RUN_ID, "b")));

    let record = store.get(RUN_ID).await.unwrap();
    assert_eq!(record.condition, RunCondition::Failed);
    assert_message_contains(&record, "task 'x' failed");
    assert_task_state(&record, "b", TaskState::NotStarted);
}
