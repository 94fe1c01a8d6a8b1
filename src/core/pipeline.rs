//! Pipeline domain model

use serde::{Deserialize, Serialize};

/// A named, declarative set of tasks with producer/consumer edges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name
    pub name: String,

    /// Revision of this definition, bumped by the store on every change
    #[serde(default)]
    pub revision: u64,

    /// Pipeline tasks, unique by name
    pub tasks: Vec<PipelineTask>,
}

/// A task inside a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTask {
    /// Unique task name within the pipeline
    pub name: String,

    /// Name of the task contract this task runs
    pub task_ref: String,

    /// Resources this task consumes from sibling tasks
    #[serde(default)]
    pub resource_dependencies: Vec<ResourceDependency>,

    /// Parameter values bound for this task
    #[serde(default)]
    pub params: Vec<Param>,
}

/// A resource handed off by one or more producer tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDependency {
    /// Name of the resource slot
    pub name: String,

    /// Tasks that must finish before the resource is ready
    #[serde(default)]
    pub provided_by: Vec<String>,
}

/// A parameter binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl PipelineDefinition {
    /// Create a pipeline at revision zero
    pub fn new(name: impl Into<String>, tasks: Vec<PipelineTask>) -> Self {
        Self {
            name: name.into(),
            revision: 0,
            tasks,
        }
    }

    /// Get a task by name
    pub fn task(&self, name: &str) -> Option<&PipelineTask> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Identity of this revision, used to key derived state
    pub fn revision_key(&self) -> RevisionKey {
        RevisionKey {
            pipeline: self.name.clone(),
            revision: self.revision,
        }
    }
}

impl PipelineTask {
    /// Create a task with no dependencies or params
    pub fn new(name: impl Into<String>, task_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_ref: task_ref.into(),
            resource_dependencies: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Add a resource dependency provided by the given tasks
    pub fn with_dependency(mut self, resource: &str, provided_by: &[&str]) -> Self {
        self.resource_dependencies.push(ResourceDependency {
            name: resource.to_string(),
            provided_by: provided_by.iter().map(|p| p.to_string()).collect(),
        });
        self
    }

    /// Add a parameter binding
    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.push(Param::new(name, value));
        self
    }

    /// Names of every producer referenced by this task, in declaration order
    pub fn producers(&self) -> impl Iterator<Item = &str> {
        self.resource_dependencies
            .iter()
            .flat_map(|dep| dep.provided_by.iter().map(String::as_str))
    }
}

/// Immutable identity of a pipeline revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RevisionKey {
    pub pipeline: String,
    pub revision: u64,
}

impl std::fmt::Display for RevisionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.pipeline, self.revision)
    }
}
