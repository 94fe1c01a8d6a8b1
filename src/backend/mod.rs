//! Execution backends that run launched tasks

pub mod config;
pub mod process;

pub use config::BackendConfig;
pub use process::ProcessBackend;

use crate::core::{ExecutionHandle, ResolvedTaskResources};
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Error types for backend operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Failed to start execution: {0}")]
    Spawn(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Step '{step}' exited with code {code}: {stderr}")]
    StepFailed {
        step: String,
        code: i32,
        stderr: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Everything a backend needs to start one task execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub run_id: String,
    pub task: String,
    pub handle: ExecutionHandle,
    pub resources: ResolvedTaskResources,

    /// Supplied params over declared defaults
    pub params: BTreeMap<String, String>,
}

impl LaunchRequest {
    pub fn new(run_id: &str, resources: ResolvedTaskResources) -> Self {
        Self {
            run_id: run_id.to_string(),
            task: resources.task_name.clone(),
            handle: ExecutionHandle::for_task(run_id, &resources.task_name),
            params: resources.effective_params(),
            resources,
        }
    }
}

/// Trait for task execution - allows for different implementations
///
/// Completion is reported asynchronously through a
/// [`StatusReporter`](crate::persistence::StatusReporter), never through the
/// return value of `launch`.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Start an execution
    ///
    /// Launching a handle that was already launched returns it without
    /// starting anything.
    async fn launch(&self, request: LaunchRequest) -> Result<ExecutionHandle, BackendError>;

    /// Tear an execution down; unknown or finished handles are a no-op
    async fn cancel(&self, handle: &ExecutionHandle) -> Result<(), BackendError>;

    /// Forget a finished run's executions
    async fn release(&self, _run_id: &str) -> Result<(), BackendError> {
        Ok(())
    }
}
