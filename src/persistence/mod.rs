//! Persistence layer: the run store the reconciler reads and writes, and
//! the history of finished runs

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod store;

pub use memory::{InMemoryHistory, InMemoryRunStore};

#[cfg(feature = "sqlite")]
pub use store::SqliteHistoryStore;

use crate::core::{
    Catalog, ExecutionHandle, ExecutionStatus, PipelineDefinition, PipelineRunSpec,
    RunCondition, RunState, TaskRun, TaskState,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("run '{0}' not found")]
    NotFound(String),

    #[error("run '{0}' already exists")]
    AlreadyExists(String),

    #[error("run '{run_id}' changed underneath the update (expected version {expected}, found {actual})")]
    VersionConflict {
        run_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Stored state of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: String,

    /// Pipeline definition at the revision this run currently follows
    pub pipeline: Arc<PipelineDefinition>,

    pub spec: PipelineRunSpec,

    /// Recorded executions by task name; tasks never launched are absent
    pub tasks: BTreeMap<String, TaskRun>,

    pub condition: RunCondition,

    /// Diagnostic for the run as a whole
    pub message: Option<String>,

    pub cancel_requested: bool,

    /// Run is removed from the store once it reaches a terminal condition
    pub deletion_requested: bool,

    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency token, bumped on every write
    pub version: u64,
}

impl RunRecord {
    pub fn new(spec: PipelineRunSpec, pipeline: Arc<PipelineDefinition>) -> Self {
        Self {
            run_id: spec.name.clone(),
            pipeline,
            spec,
            tasks: BTreeMap::new(),
            condition: RunCondition::Pending,
            message: None,
            cancel_requested: false,
            deletion_requested: false,
            started_at: None,
            completed_at: None,
            version: 0,
        }
    }

    /// Scheduler view of the recorded executions
    pub fn run_state(&self) -> RunState {
        RunState::observe(&self.tasks)
    }

    /// Mark the run finished with the given condition
    pub fn complete(&mut self, condition: RunCondition, message: Option<String>) {
        self.condition = condition;
        self.message = message;
        self.completed_at = Some(Utc::now());
    }

    /// Number of tasks in the given state, counting unlaunched tasks as
    /// `NotStarted`
    pub fn count(&self, state: TaskState) -> usize {
        let run_state = self.run_state();
        self.pipeline
            .tasks
            .iter()
            .filter(|t| run_state.get(&t.name) == state)
            .count()
    }
}

/// The store the reconciler reads definitions and run state from
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    async fn get(&self, run_id: &str) -> Result<RunRecord, StoreError>;

    /// Write a record if its version still matches the stored one
    ///
    /// Returns the new version.
    async fn put(&self, record: &RunRecord) -> Result<u64, StoreError>;

    /// Stream of ids of runs that changed
    fn watch(&self) -> broadcast::Receiver<String>;

    async fn list_runs(&self) -> Result<Vec<String>, StoreError>;

    /// Task contracts and resources runs are resolved against
    async fn catalog(&self) -> Result<Arc<Catalog>, StoreError>;

    /// Ask for a run to be torn down
    async fn cancel_run(&self, run_id: &str) -> Result<(), StoreError>;

    /// Tear a run down and remove it once it has stopped
    async fn delete_run(&self, run_id: &str) -> Result<(), StoreError>;
}

/// Receives completion reports from an execution backend
#[async_trait::async_trait]
pub trait StatusReporter: Send + Sync {
    /// Record the status of a task execution
    ///
    /// Reports for a handle other than the one recorded for the task are
    /// ignored.
    async fn report(
        &self,
        run_id: &str,
        task: &str,
        handle: &ExecutionHandle,
        status: ExecutionStatus,
        message: Option<String>,
    ) -> Result<(), StoreError>;
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    pub run_id: String,

    pub pipeline_name: String,

    /// Final run condition
    pub status: RunCondition,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    pub succeeded_tasks: usize,

    pub failed_tasks: usize,

    pub total_tasks: usize,

    /// Run diagnostic, if any
    pub message: Option<String>,
}

/// Store for run history
#[async_trait::async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Save a run summary
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load a summary by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// List summaries for a pipeline, newest first
    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// List all pipeline names with history
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// Create a history summary from a run record
pub fn create_summary(record: &RunRecord) -> ExecutionSummary {
    ExecutionSummary {
        execution_id: Uuid::new_v4(),
        run_id: record.run_id.clone(),
        pipeline_name: record.pipeline.name.clone(),
        status: record.condition,
        started_at: record.started_at.unwrap_or_else(Utc::now),
        completed_at: record.completed_at,
        succeeded_tasks: record.count(TaskState::Succeeded),
        failed_tasks: record.count(TaskState::Failed),
        total_tasks: record.pipeline.tasks.len(),
        message: record.message.clone(),
    }
}
