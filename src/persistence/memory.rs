//! In-memory run store and history

use crate::core::{
    Catalog, ExecutionHandle, ExecutionStatus, PipelineDefinition, PipelineRunSpec,
};
use crate::persistence::{
    ExecutionSummary, HistoryBackend, RunRecord, RunStore, StatusReporter, StoreError,
};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

const WATCH_CAPACITY: usize = 256;

/// A completion report that arrived before its launch was recorded
#[derive(Debug, Clone)]
struct EarlyReport {
    handle: ExecutionHandle,
    status: ExecutionStatus,
    message: Option<String>,
}

#[derive(Default)]
struct Runs {
    records: BTreeMap<String, RunRecord>,
    /// Keyed by run id and task name
    early: HashMap<(String, String), EarlyReport>,
}

impl Runs {
    /// Apply held reports whose launch is now recorded
    fn apply_early(&mut self, run_id: &str) {
        let Some(record) = self.records.get_mut(run_id) else {
            return;
        };
        let mut applied = false;
        self.early.retain(|(run, task), report| {
            if run != run_id {
                return true;
            }
            match record.tasks.get_mut(task) {
                Some(task_run) if task_run.handle.as_ref() == Some(&report.handle) => {
                    if task_run.status == ExecutionStatus::InFlight {
                        task_run.finish(report.status, report.message.take());
                        applied = true;
                    }
                    false
                }
                Some(_) => false,
                None => true,
            }
        });
        if applied {
            record.version += 1;
        }
    }
}

/// Run store kept in process memory
///
/// Every change bumps the record's version and publishes the run id on the
/// watch channel.
pub struct InMemoryRunStore {
    runs: RwLock<Runs>,
    catalog: Arc<Catalog>,
    events: broadcast::Sender<String>,
}

impl InMemoryRunStore {
    pub fn new(catalog: Catalog) -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            runs: RwLock::new(Runs::default()),
            catalog: Arc::new(catalog),
            events,
        }
    }

    /// Add a new run following the given pipeline
    pub async fn create_run(
        &self,
        spec: PipelineRunSpec,
        pipeline: PipelineDefinition,
    ) -> Result<(), StoreError> {
        let run_id = spec.name.clone();
        {
            let mut runs = self.runs.write().await;
            if runs.records.contains_key(&run_id) {
                return Err(StoreError::AlreadyExists(run_id));
            }
            runs.records
                .insert(run_id.clone(), RunRecord::new(spec, Arc::new(pipeline)));
        }
        debug!("Created run {}", run_id);
        self.notify(&run_id);
        Ok(())
    }

    /// Replace the definition of a pipeline for every run that follows it
    ///
    /// Each affected run moves to the next revision.
    pub async fn update_pipeline(&self, pipeline: PipelineDefinition) {
        let mut changed = Vec::new();
        {
            let mut runs = self.runs.write().await;
            for record in runs.records.values_mut() {
                if record.pipeline.name != pipeline.name {
                    continue;
                }
                let mut next = pipeline.clone();
                next.revision = record.pipeline.revision + 1;
                record.pipeline = Arc::new(next);
                record.version += 1;
                changed.push(record.run_id.clone());
            }
        }
        for run_id in changed {
            self.notify(&run_id);
        }
    }

    fn notify(&self, run_id: &str) {
        // No receivers is fine
        let _ = self.events.send(run_id.to_string());
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new(Catalog::default())
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryRunStore {
    async fn get(&self, run_id: &str) -> Result<RunRecord, StoreError> {
        self.runs
            .read()
            .await
            .records
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))
    }

    async fn put(&self, record: &RunRecord) -> Result<u64, StoreError> {
        let version = {
            let mut runs = self.runs.write().await;
            let stored = runs
                .records
                .get(&record.run_id)
                .map(|r| r.version)
                .ok_or_else(|| StoreError::NotFound(record.run_id.clone()))?;

            if stored != record.version {
                return Err(StoreError::VersionConflict {
                    run_id: record.run_id.clone(),
                    expected: record.version,
                    actual: stored,
                });
            }

            let mut next = record.clone();
            next.version += 1;

            if next.deletion_requested && next.condition.is_terminal() {
                debug!("Removing deleted run {}", record.run_id);
                runs.records.remove(&record.run_id);
                runs.early.retain(|(run, _), _| run != &record.run_id);
                next.version
            } else {
                let terminal = next.condition.is_terminal();
                runs.records.insert(record.run_id.clone(), next);
                runs.apply_early(&record.run_id);
                if terminal {
                    runs.early.retain(|(run, _), _| run != &record.run_id);
                }
                runs.records
                    .get(&record.run_id)
                    .map_or(stored + 1, |r| r.version)
            }
        };

        self.notify(&record.run_id);
        Ok(version)
    }

    fn watch(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    async fn list_runs(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.runs.read().await.records.keys().cloned().collect())
    }

    async fn catalog(&self) -> Result<Arc<Catalog>, StoreError> {
        Ok(self.catalog.clone())
    }

    async fn cancel_run(&self, run_id: &str) -> Result<(), StoreError> {
        {
            let mut runs = self.runs.write().await;
            let record = runs
                .records
                .get_mut(run_id)
                .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
            if record.cancel_requested {
                return Ok(());
            }
            record.cancel_requested = true;
            record.version += 1;
        }
        self.notify(run_id);
        Ok(())
    }

    async fn delete_run(&self, run_id: &str) -> Result<(), StoreError> {
        {
            let mut runs = self.runs.write().await;
            let terminal = runs
                .records
                .get(run_id)
                .map(|r| r.condition.is_terminal())
                .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;

            if terminal {
                runs.records.remove(run_id);
            } else if let Some(record) = runs.records.get_mut(run_id) {
                record.cancel_requested = true;
                record.deletion_requested = true;
                record.version += 1;
            }
        }
        self.notify(run_id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl StatusReporter for InMemoryRunStore {
    async fn report(
        &self,
        run_id: &str,
        task: &str,
        handle: &ExecutionHandle,
        status: ExecutionStatus,
        message: Option<String>,
    ) -> Result<(), StoreError> {
        if status == ExecutionStatus::InFlight {
            return Ok(());
        }
        {
            let mut guard = self.runs.write().await;
            let runs = &mut *guard;
            let record = runs
                .records
                .get_mut(run_id)
                .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;

            let Some(task_run) = record.tasks.get_mut(task) else {
                if record.condition.is_terminal() {
                    debug!("Ignoring report for {} of finished run {}", handle, run_id);
                    return Ok(());
                }
                debug!("Holding report for {} until its launch is recorded", handle);
                runs.early.insert(
                    (run_id.to_string(), task.to_string()),
                    EarlyReport {
                        handle: handle.clone(),
                        status,
                        message,
                    },
                );
                return Ok(());
            };
            if task_run.handle.as_ref() != Some(handle) {
                debug!("Ignoring report for stale handle {}", handle);
                return Ok(());
            }
            if task_run.status != ExecutionStatus::InFlight {
                return Ok(());
            }

            task_run.finish(status, message);
            record.version += 1;
        }
        self.notify(run_id);
        Ok(())
    }
}

/// In-memory history (for testing or ephemeral use)
pub struct InMemoryHistory {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
    by_pipeline: RwLock<HashMap<String, Vec<Uuid>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            by_pipeline: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HistoryBackend for InMemoryHistory {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        let is_new = execs
            .insert(execution.execution_id, execution.clone())
            .is_none();

        if is_new {
            self.by_pipeline
                .write()
                .await
                .entry(execution.pipeline_name.clone())
                .or_default()
                .push(execution.execution_id);
        }

        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        Ok(self.executions.read().await.get(&execution_id).cloned())
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let by_pipeline = self.by_pipeline.read().await;

        let mut result: Vec<ExecutionSummary> = by_pipeline
            .get(pipeline_name)
            .map(|ids| ids.iter().filter_map(|id| execs.get(id).cloned()).collect())
            .unwrap_or_default();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.by_pipeline.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
