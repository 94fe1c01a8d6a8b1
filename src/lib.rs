//! pipeline-scheduler - dependency-graph scheduling for build/test/deploy pipelines

pub mod backend;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use backend::{BackendConfig, BackendError, ExecutionBackend, LaunchRequest, ProcessBackend};
pub use core::{
    Catalog, DependencyGraph, ExecutionHandle, ExecutionStatus, GraphError, Manifest,
    PipelineDefinition, PipelineRunSpec, PipelineTask, RunCondition, RunState, TaskContract,
    TaskState,
};
pub use execution::{
    Controller, ControllerConfig, FailurePolicy, ReconcileEvent, Reconciler, SchedulingStrategy,
};
pub use persistence::{InMemoryRunStore, RunRecord, RunStore, StatusReporter, StoreError};
