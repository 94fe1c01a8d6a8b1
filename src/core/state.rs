//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Scheduler view of a single task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// No launch request has been issued
    #[default]
    NotStarted,
    /// A launch request was issued and the task hasn't finished
    Running,
    /// Task finished successfully
    Succeeded,
    /// Task failed, was rejected before launch, or was cancelled
    Failed,
}

impl TaskState {
    /// Check if the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

/// Status of an execution as reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Not finished (or never launched)
    #[default]
    InFlight,
    Succeeded,
    Failed,
}

/// Run-wide condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunCondition {
    /// Run exists but no pass has processed it yet
    #[default]
    Pending,
    /// Run has non-terminal tasks
    Running,
    /// Every task succeeded
    Succeeded,
    /// A task failed, or the pipeline graph is invalid
    Failed,
    /// Run was cancelled externally
    Cancelled,
}

impl RunCondition {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunCondition::Succeeded | RunCondition::Failed | RunCondition::Cancelled
        )
    }
}

impl fmt::Display for RunCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunCondition::Pending => "Pending",
            RunCondition::Running => "Running",
            RunCondition::Succeeded => "Succeeded",
            RunCondition::Failed => "Failed",
            RunCondition::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Identifier of one task execution in the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionHandle(pub String);

impl ExecutionHandle {
    /// Deterministic handle for a task of a run, so relaunching is detectable
    pub fn for_task(run_id: &str, task: &str) -> Self {
        Self(format!("{}-{}", run_id, task))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Recorded state of one task execution within a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRun {
    /// Set once a launch request was issued
    pub handle: Option<ExecutionHandle>,

    /// Last status reported for the execution
    pub status: ExecutionStatus,

    /// Failure diagnostic, if any
    pub message: Option<String>,

    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRun {
    /// A task whose launch request was accepted
    pub fn launched(handle: ExecutionHandle) -> Self {
        Self {
            handle: Some(handle),
            status: ExecutionStatus::InFlight,
            message: None,
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    /// A task failed before it could launch
    pub fn rejected(message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            handle: None,
            status: ExecutionStatus::Failed,
            message: Some(message.into()),
            started_at: None,
            completed_at: Some(now),
        }
    }

    /// Map the reported execution status into the scheduler's view
    pub fn state(&self) -> TaskState {
        match self.status {
            ExecutionStatus::Succeeded => TaskState::Succeeded,
            ExecutionStatus::Failed => TaskState::Failed,
            ExecutionStatus::InFlight if self.handle.is_some() => TaskState::Running,
            ExecutionStatus::InFlight => TaskState::NotStarted,
        }
    }

    /// Mark the execution finished
    pub fn finish(&mut self, status: ExecutionStatus, message: Option<String>) {
        self.status = status;
        if message.is_some() {
            self.message = message;
        }
        if status != ExecutionStatus::InFlight {
            self.completed_at = Some(Utc::now());
        }
    }
}

/// Per-run mapping from task name to state
///
/// Tasks absent from the map are `NotStarted`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    tasks: BTreeMap<String, TaskState>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a run state from recorded task executions
    pub fn observe(task_runs: &BTreeMap<String, TaskRun>) -> Self {
        Self {
            tasks: task_runs
                .iter()
                .map(|(name, run)| (name.clone(), run.state()))
                .collect(),
        }
    }

    /// Get the state of a task
    pub fn get(&self, task: &str) -> TaskState {
        self.tasks.get(task).copied().unwrap_or_default()
    }

    /// Set the state of a task
    pub fn set(&mut self, task: impl Into<String>, state: TaskState) {
        self.tasks.insert(task.into(), state);
    }

    /// Builder form of [`RunState::set`]
    pub fn with(mut self, task: &str, state: TaskState) -> Self {
        self.set(task, state);
        self
    }

    /// Number of tasks in the given state
    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|s| **s == state).count()
    }
}
