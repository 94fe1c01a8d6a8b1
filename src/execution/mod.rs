//! Run execution: readiness, graph caching, and the reconcile loop

pub mod cache;
pub mod controller;
pub mod queue;
pub mod reconciler;
pub mod scheduler;

pub use cache::GraphCache;
pub use controller::{wait_for_completion, Controller, ControllerConfig, ControllerHandle};
pub use queue::{QueueError, WorkQueue};
pub use reconciler::{
    EventHandler, FailurePolicy, ReconcileError, ReconcileEvent, ReconcileOutcome, Reconciler,
};
pub use scheduler::{aggregate_condition, ready_tasks, SchedulingStrategy};
