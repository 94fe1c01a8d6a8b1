//! Concurrent writes landing in the middle of a pass

use crate::helpers::*;
use async_trait::async_trait;
use pipeline_scheduler::core::{
    Catalog, ExecutionHandle, ExecutionStatus, PipelineDefinition, PipelineRunSpec, PipelineTask,
    TaskState,
};
use pipeline_scheduler::execution::{GraphCache, ReconcileEvent, ReconcileOutcome, Reconciler};
use pipeline_scheduler::persistence::{
    InMemoryRunStore, RunRecord, RunStore, StatusReporter, StoreError,
};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Store that lets a task finish right before the next write lands
struct RacingStore {
    inner: InMemoryRunStore,
    finish_before_put: Mutex<Option<String>>,
    puts: Mutex<usize>,
}

impl RacingStore {
    fn arm(&self, task: &str) {
        *self.finish_before_put.lock().unwrap() = Some(task.to_string());
    }
}

#[async_trait]
impl RunStore for RacingStore {
    async fn get(&self, run_id: &str) -> Result<RunRecord, StoreError> {
        self.inner.get(run_id).await
    }

    async fn put(&self, record: &RunRecord) -> Result<u64, StoreError> {
        *self.puts.lock().unwrap() += 1;
        let racing = self.finish_before_put.lock().unwrap().take();
        if let Some(task) = racing {
            let handle = ExecutionHandle::for_task(&record.run_id, &task);
            self.inner
                .report(&record.run_id, &task, &handle, ExecutionStatus::Succeeded, None)
                .await?;
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

/// a -> c, b -> d
fn pipeline() -> PipelineDefinition {
    PipelineDefinition::new(
        "pairs",
        vec![
            PipelineTask::new("a", "noop"),
            PipelineTask::new("b", "noop"),
            PipelineTask::new("c", "noop").with_dependency("out", &["a"]),
            PipelineTask::new("d", "noop").with_dependency("out", &["b"]),
        ],
    )
}

/// Test that a conflicting write is retried without starting anything twice
#[tokio::test]
async fn test_conflict_retries_without_double_launch() {
    let store = Arc::new(RacingStore {
        inner: InMemoryRunStore::new(noop_catalog()),
        finish_before_put: Mutex::new(None),
        puts: Mutex::new(0),
    });
    store
        .inner
        .create_run(PipelineRunSpec::new(RUN_ID, "pairs"), pipeline())
        .await
        .unwrap();

    let backend = Arc::new(MockBackend::new());
    let reconciler = Reconciler::new(store.clone(), backend.clone(), Arc::new(GraphCache::new(8)));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    reconciler
        .add_event_handler(move |event| sink.lock().unwrap().push(event))
        .await;

    reconciler.reconcile(RUN_ID).await.unwrap();
    assert_launched(&backend, &["a", "b"]);

    let handle = ExecutionHandle::for_task(RUN_ID, "a");
    store
        .inner
        .report(RUN_ID, "a", &handle, ExecutionStatus::Succeeded, None)
        .await
        .unwrap();

    // b finishes while the pass that launches c is writing
    store.arm("b");
    let outcome = reconciler.reconcile(RUN_ID).await.unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Updated { .. }));
    assert_eq!(*store.puts.lock().unwrap(), 3, "one write, one conflict, one retry");
    assert_eq!(backend.starts("c"), 1);
    assert_eq!(backend.launch_calls(), 5, "c is requested again on retry");
    assert_launched(&backend, &["a", "b", "c", "d"]);

    let record = store.get(RUN_ID).await.unwrap();
    assert_task_state(&record, "b", TaskState::Succeeded);
    assert_task_state(&record, "c", TaskState::Running);
    assert_task_state(&record, "d", TaskState::Running);

    let launched_c = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, ReconcileEvent::TaskLaunched { task, .. } if task == "c"))
        .count();
    assert_eq!(launched_c, 1, "events only follow a successful write");
}
