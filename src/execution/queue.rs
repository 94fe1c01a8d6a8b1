//! Coalescing work queue of run ids
//!
//! A run id is queued at most once. If it is added again while a worker is
//! processing it, it is queued once more when that worker calls `done`, so
//! no two workers ever process the same run concurrently.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("work queue is shut down")]
    ShutDown,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    /// Ids waiting to be processed, queued or held back
    dirty: HashSet<String>,
    /// Ids handed to a worker and not yet done
    processing: HashSet<String>,
    shutdown: bool,
}

/// Bounded queue that deduplicates repeated notifications for a run
pub struct WorkQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    items: Notify,
    space: Notify,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            items: Notify::new(),
            space: Notify::new(),
        })
    }

    /// Queue a run id, waiting for room if the queue is full
    pub async fn add(&self, id: &str) -> Result<(), QueueError> {
        loop {
            // Created before checking so a wakeup in between isn't lost
            let space = self.space.notified();
            {
                let mut state = self.state.lock().await;
                if state.shutdown {
                    return Err(QueueError::ShutDown);
                }
                if state.dirty.contains(id) {
                    return Ok(());
                }
                if state.processing.contains(id) {
                    // Requeued by `done`
                    state.dirty.insert(id.to_string());
                    return Ok(());
                }
                if state.queue.len() < self.capacity {
                    state.dirty.insert(id.to_string());
                    state.queue.push_back(id.to_string());
                    self.items.notify_one();
                    return Ok(());
                }
            }
            debug!("Work queue full, waiting to add {}", id);
            space.await;
        }
    }

    /// Queue a run id after a delay
    pub fn add_after(self: &Arc<Self>, id: String, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = queue.add(&id).await;
        });
    }

    /// Take the next run id, waiting until one is available
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let items = self.items.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(id) = state.queue.pop_front() {
                    state.dirty.remove(&id);
                    state.processing.insert(id.clone());
                    self.space.notify_one();
                    return Some(id);
                }
                if state.shutdown {
                    return None;
                }
            }
            items.await;
        }
    }

    /// Mark a run id as processed
    pub async fn done(&self, id: &str) {
        let mut state = self.state.lock().await;
        state.processing.remove(id);
        if state.dirty.contains(id) {
            state.queue.push_back(id.to_string());
            self.items.notify_one();
        }
    }

    /// Stop accepting ids and wake every waiting worker
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.shutdown = true;
        self.items.notify_waiters();
        self.space.notify_waiters();
    }

    /// Number of ids waiting to be handed out
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
