//! Graph cache keyed by pipeline revision

use crate::core::{DependencyGraph, GraphError, PipelineDefinition, RevisionKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

struct Entry {
    graph: Arc<DependencyGraph>,
    last_used: u64,
}

struct Inner {
    entries: HashMap<RevisionKey, Entry>,
    tick: u64,
}

/// Size-bounded, least-recently-used map from revision to built graph
///
/// Graphs are immutable, so a hit hands out a shared reference and no lock
/// is held while callers read it.
pub struct GraphCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl GraphCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// Return the cached graph for this revision, building it on a miss
    ///
    /// Build failures are not cached.
    pub fn get_or_build(
        &self,
        pipeline: &PipelineDefinition,
    ) -> Result<Arc<DependencyGraph>, GraphError> {
        let key = pipeline.revision_key();

        if let Some(graph) = self.get(&key) {
            return Ok(graph);
        }

        let graph = Arc::new(DependencyGraph::build(pipeline)?);
        self.insert(key, graph.clone());
        Ok(graph)
    }

    pub fn get(&self, key: &RevisionKey) -> Option<Arc<DependencyGraph>> {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let graph = inner.entries.get_mut(key).map(|entry| {
            entry.last_used = tick;
            entry.graph.clone()
        });
        graph
    }

    pub fn insert(&self, key: RevisionKey, graph: Arc<DependencyGraph>) {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!("Evicting graph for {}", oldest);
                inner.entries.remove(&oldest);
            }
        }

        inner.entries.insert(
            key,
            Entry {
                graph,
                last_used: tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // The map stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
