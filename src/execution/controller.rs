//! Controller - worker pool that keeps every run reconciled

use crate::backend::ExecutionBackend;
use crate::execution::cache::GraphCache;
use crate::execution::queue::{QueueError, WorkQueue};
use crate::execution::reconciler::{FailurePolicy, Reconciler};
use crate::execution::scheduler::SchedulingStrategy;
use crate::persistence::{RunRecord, RunStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Configuration for the controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of concurrent workers
    pub workers: usize,

    /// Maximum number of queued run ids
    pub queue_capacity: usize,

    /// Maximum number of cached pipeline graphs
    pub cache_capacity: usize,

    /// Retries of a pass that lost a write race
    pub max_conflict_retries: usize,

    /// Delay before a failed pass is retried
    pub requeue_delay_ms: u64,

    pub failure_policy: FailurePolicy,

    pub strategy: SchedulingStrategy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            cache_capacity: 64,
            max_conflict_retries: 5,
            requeue_delay_ms: 500,
            failure_policy: FailurePolicy::default(),
            strategy: SchedulingStrategy::default(),
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_requeue_delay(mut self, delay_ms: u64) -> Self {
        self.requeue_delay_ms = delay_ms;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_strategy(mut self, strategy: SchedulingStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Feeds store notifications into a work queue drained by N workers
pub struct Controller {
    store: Arc<dyn RunStore>,
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        store: Arc<dyn RunStore>,
        backend: Arc<dyn ExecutionBackend>,
        config: ControllerConfig,
    ) -> Self {
        let cache = Arc::new(GraphCache::new(config.cache_capacity));
        let reconciler = Reconciler::new(store.clone(), backend, cache)
            .with_strategy(config.strategy)
            .with_failure_policy(config.failure_policy)
            .with_max_conflict_retries(config.max_conflict_retries);

        Self {
            store,
            reconciler: Arc::new(reconciler),
            queue: WorkQueue::new(config.queue_capacity),
            config,
        }
    }

    /// The reconciler, for registering event handlers
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Start the watcher and the workers
    ///
    /// Every run already in the store is queued once at startup.
    pub async fn start(&self) -> ControllerHandle {
        // Subscribed before the initial sync so no change falls in between
        let watch = self.store.watch();
        if let Err(e) = resync(self.store.as_ref(), &self.queue).await {
            warn!("Initial sync failed: {}", e);
        }

        let watcher = tokio::spawn(run_watcher(watch, self.store.clone(), self.queue.clone()));

        let mut workers = JoinSet::new();
        let delay = Duration::from_millis(self.config.requeue_delay_ms);
        for id in 0..self.config.workers.max(1) {
            workers.spawn(run_worker(
                id,
                self.queue.clone(),
                self.reconciler.clone(),
                delay,
            ));
        }

        info!("Controller started with {} workers", self.config.workers.max(1));

        ControllerHandle {
            queue: self.queue.clone(),
            watcher,
            workers,
        }
    }
}

/// Handle to a running controller
pub struct ControllerHandle {
    queue: Arc<WorkQueue>,
    watcher: JoinHandle<()>,
    workers: JoinSet<()>,
}

impl ControllerHandle {
    /// Stop watching, let workers drain the queue, and wait for them
    pub async fn shutdown(mut self) {
        self.watcher.abort();
        self.queue.shutdown().await;
        while self.workers.join_next().await.is_some() {}
        info!("Controller stopped");
    }
}

async fn run_watcher(
    mut watch: tokio::sync::broadcast::Receiver<String>,
    store: Arc<dyn RunStore>,
    queue: Arc<WorkQueue>,
) {
    loop {
        let result = match watch.recv().await {
            Ok(run_id) => queue.add(&run_id).await,
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {} run notifications, resyncing", missed);
                resync(store.as_ref(), &queue).await
            }
            Err(RecvError::Closed) => break,
        };
        if result.is_err() {
            break;
        }
    }
    debug!("Watcher stopped");
}

async fn run_worker(
    id: usize,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    requeue_delay: Duration,
) {
    while let Some(run_id) = queue.get().await {
        match reconciler.reconcile(&run_id).await {
            Ok(outcome) => debug!("Worker {} reconciled {}: {:?}", id, run_id, outcome),
            Err(e) => {
                warn!("Reconciling {} failed, retrying later: {}", run_id, e);
                queue.add_after(run_id.clone(), requeue_delay);
            }
        }
        queue.done(&run_id).await;
    }
    debug!("Worker {} stopped", id);
}

/// Queue every run in the store
async fn resync(store: &dyn RunStore, queue: &WorkQueue) -> Result<(), QueueError> {
    match store.list_runs().await {
        Ok(run_ids) => {
            for run_id in run_ids {
                queue.add(&run_id).await?;
            }
        }
        Err(e) => warn!("Failed to list runs: {}", e),
    }
    Ok(())
}

/// Wait until a run reaches a terminal condition
///
/// Returns the last stored record. A run removed from the store while
/// waiting yields `NotFound`.
pub async fn wait_for_completion(
    store: &dyn RunStore,
    run_id: &str,
) -> Result<RunRecord, StoreError> {
    let mut watch = store.watch();
    loop {
        let record = store.get(run_id).await?;
        if record.condition.is_terminal() {
            return Ok(record);
        }

        loop {
            match watch.recv().await {
                Ok(changed) if changed == run_id => break,
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => break,
                Err(RecvError::Closed) => return Ok(record),
            }
        }
    }
}
