//! Reconciler - one read, compute, write pass over a run

use crate::backend::{BackendError, ExecutionBackend, LaunchRequest};
use crate::core::validate::resolve;
use crate::core::{ExecutionHandle, ExecutionStatus, RunCondition, TaskRun, TaskState};
use crate::execution::cache::GraphCache;
use crate::execution::scheduler::{aggregate_condition, ready_tasks, SchedulingStrategy};
use crate::persistence::{RunRecord, RunStore, StoreError};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// What to do with running tasks once a sibling has failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop launching; tasks already running finish on their own
    #[default]
    LetRunningFinish,

    /// Stop launching and tear down every running task
    CancelRunning,
}

/// Events that can occur while reconciling runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    RunStarted {
        run_id: String,
        pipeline_name: String,
    },
    TaskLaunched {
        run_id: String,
        task: String,
        handle: ExecutionHandle,
    },
    TaskRejected {
        run_id: String,
        task: String,
        reason: String,
    },
    TaskCancelled {
        run_id: String,
        task: String,
    },
    RunCompleted {
        run_id: String,
        condition: RunCondition,
        message: Option<String>,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ReconcileEvent) + Send + Sync>;

/// Result of a successful pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The run no longer exists
    Missing,
    /// The run already finished
    Terminal,
    /// Nothing to write
    Unchanged,
    Updated { version: u64 },
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("run '{run_id}' kept changing during reconciliation, gave up after {attempts} attempts")]
    ConflictRetriesExhausted { run_id: String, attempts: usize },
}

/// Drives runs forward one pass at a time
///
/// A pass never waits for tasks to finish. It issues launches and returns;
/// completion reports change the run in the store, which triggers the next
/// pass.
pub struct Reconciler {
    store: Arc<dyn RunStore>,
    backend: Arc<dyn ExecutionBackend>,
    cache: Arc<GraphCache>,
    strategy: SchedulingStrategy,
    failure_policy: FailurePolicy,
    max_conflict_retries: usize,
    event_handlers: Mutex<Vec<EventHandler>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RunStore>,
        backend: Arc<dyn ExecutionBackend>,
        cache: Arc<GraphCache>,
    ) -> Self {
        Self {
            store,
            backend,
            cache,
            strategy: SchedulingStrategy::default(),
            failure_policy: FailurePolicy::default(),
            max_conflict_retries: 5,
            event_handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_strategy(mut self, strategy: SchedulingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: usize) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ReconcileEvent) + Send + Sync + 'static,
    {
        self.event_handlers.lock().await.push(Arc::new(handler));
    }

    async fn emit_event(&self, event: ReconcileEvent) {
        let handlers = self.event_handlers.lock().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Reconcile a run, retrying when the stored run changed mid-pass
    #[instrument(skip(self))]
    pub async fn reconcile(&self, run_id: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.pass(run_id).await {
                Err(ReconcileError::Store(StoreError::VersionConflict { .. }))
                    if attempts <= self.max_conflict_retries =>
                {
                    debug!("Run {} changed during pass {}, retrying", run_id, attempts);
                }
                Err(ReconcileError::Store(StoreError::VersionConflict { .. })) => {
                    return Err(ReconcileError::ConflictRetriesExhausted {
                        run_id: run_id.to_string(),
                        attempts,
                    });
                }
                outcome => return outcome,
            }
        }
    }

    async fn pass(&self, run_id: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let mut record = match self.store.get(run_id).await {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => {
                debug!("Run {} is gone, nothing to do", run_id);
                return Ok(ReconcileOutcome::Missing);
            }
            Err(e) => return Err(e.into()),
        };

        if record.condition.is_terminal() {
            return Ok(ReconcileOutcome::Terminal);
        }

        let original = record.clone();
        let mut events = Vec::new();

        if record.cancel_requested {
            info!("Cancelling run {}", run_id);
            self.cancel_running(&mut record, "cancelled", &mut events)
                .await?;
            self.finish(&mut record, RunCondition::Cancelled, Some("run was cancelled".into()), &mut events);
            return self.commit(&original, record, events, None).await;
        }

        let graph = match self.cache.get_or_build(&record.pipeline) {
            Ok(graph) => graph,
            Err(e) => {
                warn!("Run {} has an invalid pipeline: {}", run_id, e);
                self.finish(&mut record, RunCondition::Failed, Some(e.to_string()), &mut events);
                return self.commit(&original, record, events, None).await;
            }
        };

        if record.condition == RunCondition::Pending {
            record.condition = RunCondition::Running;
            record.started_at = Some(Utc::now());
            events.push(ReconcileEvent::RunStarted {
                run_id: record.run_id.clone(),
                pipeline_name: record.pipeline.name.clone(),
            });
        }

        let state = record.run_state();
        match aggregate_condition(&graph, &state) {
            RunCondition::Failed => {
                if self.failure_policy == FailurePolicy::CancelRunning {
                    self.cancel_running(&mut record, "cancelled after a sibling task failed", &mut events)
                        .await?;
                }
                let message = failure_message(&record);
                self.finish(&mut record, RunCondition::Failed, message, &mut events);
                return self.commit(&original, record, events, None).await;
            }
            RunCondition::Succeeded => {
                self.finish(&mut record, RunCondition::Succeeded, None, &mut events);
                return self.commit(&original, record, events, None).await;
            }
            _ => {}
        }

        let selected = self
            .strategy
            .select(ready_tasks(&graph, &state), state.count(TaskState::Running));
        let mut backend_error = None;

        if !selected.is_empty() {
            let catalog = self.store.catalog().await?;
            let mut launches = JoinSet::new();

            for name in selected {
                let Some(task) = record.pipeline.task(&name) else {
                    continue;
                };

                let resolved = resolve(
                    task,
                    &record.spec,
                    |n| catalog.task(n).cloned(),
                    |n| catalog.resource(n).cloned(),
                )
                .map_err(|e| e.to_string())
                .and_then(|r| r.validate().map(|_| r).map_err(|e| e.to_string()));

                match resolved {
                    Ok(resources) => {
                        let request = LaunchRequest::new(&record.run_id, resources);
                        let backend = self.backend.clone();
                        launches.spawn(async move {
                            let task = request.task.clone();
                            (task, backend.launch(request).await)
                        });
                    }
                    Err(reason) => {
                        warn!("Task {} of run {} rejected: {}", name, run_id, reason);
                        record.tasks.insert(name.clone(), TaskRun::rejected(reason.clone()));
                        events.push(ReconcileEvent::TaskRejected {
                            run_id: record.run_id.clone(),
                            task: name,
                            reason,
                        });
                    }
                }
            }

            while let Some(joined) = launches.join_next().await {
                match joined {
                    Ok((task, Ok(handle))) => {
                        debug!("Launched {} as {}", task, handle);
                        record
                            .tasks
                            .insert(task.clone(), TaskRun::launched(handle.clone()));
                        events.push(ReconcileEvent::TaskLaunched {
                            run_id: record.run_id.clone(),
                            task,
                            handle,
                        });
                    }
                    Ok((task, Err(e))) => {
                        error!("Failed to launch task {} of run {}: {}", task, run_id, e);
                        backend_error.get_or_insert(ReconcileError::Backend(e));
                    }
                    Err(e) => {
                        error!("Launch of a task of run {} panicked: {}", run_id, e);
                        backend_error.get_or_insert(ReconcileError::Backend(
                            BackendError::Internal(e.to_string()),
                        ));
                    }
                }
            }
        }

        self.commit(&original, record, events, backend_error).await
    }

    /// Tear down every unfinished task of a run
    ///
    /// Tasks the record has no launch for are cancelled too: an earlier pass
    /// may have started them and then lost its write. Recorded running tasks
    /// are marked failed.
    async fn cancel_running(
        &self,
        record: &mut RunRecord,
        reason: &str,
        events: &mut Vec<ReconcileEvent>,
    ) -> Result<(), ReconcileError> {
        let pipeline = record.pipeline.clone();
        for task in &pipeline.tasks {
            let run = record.tasks.get_mut(&task.name);
            if run.as_ref().is_some_and(|run| run.state().is_terminal()) {
                continue;
            }

            let handle = run
                .as_ref()
                .and_then(|run| run.handle.clone())
                .unwrap_or_else(|| ExecutionHandle::for_task(&record.run_id, &task.name));
            self.backend.cancel(&handle).await?;

            if let Some(run) = run {
                run.finish(ExecutionStatus::Failed, Some(reason.to_string()));
                events.push(ReconcileEvent::TaskCancelled {
                    run_id: record.run_id.clone(),
                    task: task.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn finish(
        &self,
        record: &mut RunRecord,
        condition: RunCondition,
        message: Option<String>,
        events: &mut Vec<ReconcileEvent>,
    ) {
        info!("Run {} finished: {}", record.run_id, condition);
        record.complete(condition, message.clone());
        events.push(ReconcileEvent::RunCompleted {
            run_id: record.run_id.clone(),
            condition,
            message,
        });
    }

    /// Persist the record if the pass changed it, then publish its events
    async fn commit(
        &self,
        original: &RunRecord,
        record: RunRecord,
        events: Vec<ReconcileEvent>,
        backend_error: Option<ReconcileError>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if record == *original {
            return match backend_error {
                Some(e) => Err(e),
                None => Ok(ReconcileOutcome::Unchanged),
            };
        }

        let version = self.store.put(&record).await?;
        for event in events {
            self.emit_event(event).await;
        }

        if record.condition.is_terminal() {
            if let Err(e) = self.backend.release(&record.run_id).await {
                warn!("Failed to release executions of run {}: {}", record.run_id, e);
            }
        }

        match backend_error {
            Some(e) => Err(e),
            None => Ok(ReconcileOutcome::Updated { version }),
        }
    }
}

fn failure_message(record: &RunRecord) -> Option<String> {
    record
        .tasks
        .iter()
        .find(|(_, run)| run.state() == TaskState::Failed)
        .map(|(task, run)| match &run.message {
            Some(message) => format!("task '{}' failed: {}", task, message),
            None => format!("task '{}' failed", task),
        })
}
