//! Dependency graph construction
//!
//! Edges run from producer to consumer: a task that provides a resource must
//! finish before any task that consumes it may start.

use crate::core::pipeline::PipelineDefinition;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors that make a pipeline unrunnable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("pipeline declares task {0:?} more than once")]
    DuplicateTask(String),

    #[error("task {consumer:?} depends on task {producer:?}, which is not in the pipeline")]
    UnknownTaskReference { consumer: String, producer: String },

    #[error("cycle detected in pipeline tasks: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
}

/// A task node with both edge directions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// Tasks that must succeed before this one
    pub producers: BTreeSet<String>,
    /// Tasks waiting on this one
    pub consumers: BTreeSet<String>,
}

/// Immutable, acyclic producer/consumer graph of a pipeline revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Node>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Build the graph for a pipeline
    ///
    /// Producers named several times by a consumer collapse into one edge.
    #[instrument(skip_all, fields(pipeline = %pipeline.name, tasks = pipeline.tasks.len()))]
    pub fn build(pipeline: &PipelineDefinition) -> Result<Self, GraphError> {
        let mut nodes: BTreeMap<String, Node> = BTreeMap::new();
        for task in &pipeline.tasks {
            if nodes.insert(task.name.clone(), Node::default()).is_some() {
                return Err(GraphError::DuplicateTask(task.name.clone()));
            }
        }

        for task in &pipeline.tasks {
            for producer in task.producers() {
                if !nodes.contains_key(producer) {
                    return Err(GraphError::UnknownTaskReference {
                        consumer: task.name.clone(),
                        producer: producer.to_string(),
                    });
                }
                if let Some(node) = nodes.get_mut(&task.name) {
                    node.producers.insert(producer.to_string());
                }
                if let Some(node) = nodes.get_mut(producer) {
                    node.consumers.insert(task.name.clone());
                }
            }
        }

        let graph = Self { nodes };
        graph.check_acyclic()?;

        debug!("Built dependency graph with {} edges", graph.edge_count());
        Ok(graph)
    }

    /// Three-color DFS along producer -> consumer edges
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut colors: BTreeMap<&str, Color> =
            self.nodes.keys().map(|k| (k.as_str(), Color::Unvisited)).collect();
        let mut path: Vec<&str> = Vec::new();

        for name in self.nodes.keys() {
            if colors[name.as_str()] == Color::Unvisited {
                self.visit(name, &mut colors, &mut path)?;
            }
        }

        Ok(())
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        colors: &mut BTreeMap<&'a str, Color>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), GraphError> {
        colors.insert(name, Color::InProgress);
        path.push(name);

        for next in &self.nodes[name].consumers {
            match colors[next.as_str()] {
                Color::InProgress => {
                    let start = path.iter().position(|n| *n == next.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| n.to_string()).collect();
                    cycle.push(next.clone());
                    return Err(GraphError::CyclicDependency(cycle));
                }
                Color::Unvisited => self.visit(next, colors, path)?,
                Color::Done => {}
            }
        }

        path.pop();
        colors.insert(name, Color::Done);
        Ok(())
    }

    /// Task names, sorted
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, task: &str) -> bool {
        self.nodes.contains_key(task)
    }

    pub fn node(&self, task: &str) -> Option<&Node> {
        self.nodes.get(task)
    }

    /// Tasks that must succeed before `task` may start
    pub fn producers(&self, task: &str) -> impl Iterator<Item = &str> {
        self.nodes
            .get(task)
            .into_iter()
            .flat_map(|n| n.producers.iter().map(String::as_str))
    }

    /// Tasks that consume something `task` provides
    pub fn consumers(&self, task: &str) -> impl Iterator<Item = &str> {
        self.nodes
            .get(task)
            .into_iter()
            .flat_map(|n| n.consumers.iter().map(String::as_str))
    }

    /// All `(producer, consumer)` edges, sorted
    pub fn edges(&self) -> BTreeSet<(String, String)> {
        self.nodes
            .iter()
            .flat_map(|(consumer, node)| {
                node.producers
                    .iter()
                    .map(move |p| (p.clone(), consumer.clone()))
            })
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.producers.len()).sum()
    }

    /// Tasks with no producers
    pub fn roots(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.producers.is_empty())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Group tasks into waves: wave N holds the tasks whose longest producer
    /// chain has length N, so every wave can run in parallel once the
    /// previous ones have finished
    pub fn waves(&self) -> Vec<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(name, n)| (name.as_str(), n.producers.len()))
            .collect();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut waves = Vec::new();

        while placed.len() < self.nodes.len() {
            let wave: Vec<&str> = remaining
                .iter()
                .filter(|(name, unmet)| **unmet == 0 && !placed.contains(*name))
                .map(|(name, _)| *name)
                .collect();
            if wave.is_empty() {
                break;
            }
            for name in &wave {
                placed.insert(*name);
                for consumer in self.consumers(name) {
                    if let Some(unmet) = remaining.get_mut(consumer) {
                        *unmet -= 1;
                    }
                }
            }
            waves.push(wave.into_iter().map(String::from).collect());
        }

        waves
    }
}
