//! Pipeline resources and per-run bindings

use crate::core::pipeline::Param;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of resource kinds a slot can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// A source repository
    Git,
    /// A container image
    Image,
    /// A storage bucket or volume
    Storage,
    /// A target cluster
    Cluster,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Git => "git",
            ResourceType::Image => "image",
            ResourceType::Storage => "storage",
            ResourceType::Cluster => "cluster",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete resource instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResource {
    pub name: String,

    #[serde(rename = "type")]
    pub resource_type: ResourceType,

    #[serde(default)]
    pub params: Vec<Param>,
}

impl PipelineResource {
    pub fn new(name: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            name: name.into(),
            resource_type,
            params: Vec::new(),
        }
    }
}

/// One execution instance of a pipeline, as declared
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRunSpec {
    /// Run name, which is also its id in the store
    pub name: String,

    /// Name of the pipeline to run
    pub pipeline_ref: String,

    /// Resources bound to each pipeline task
    #[serde(default)]
    pub task_resources: Vec<PipelineTaskResource>,
}

/// Resource bindings for one pipeline task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTaskResource {
    /// Pipeline task name
    pub name: String,

    #[serde(default)]
    pub inputs: Vec<ResourceBinding>,

    #[serde(default)]
    pub outputs: Vec<ResourceBinding>,
}

/// Binds a declared slot to a named resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBinding {
    /// Slot name in the task contract
    pub name: String,

    /// Name of the resource in the catalog
    pub resource_ref: String,
}

impl PipelineRunSpec {
    pub fn new(name: impl Into<String>, pipeline_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pipeline_ref: pipeline_ref.into(),
            task_resources: Vec::new(),
        }
    }

    /// Bind `resource` to the named slot on both the input and output side
    pub fn bind_inout(mut self, task: &str, slot: &str, resource: &str) -> Self {
        let binding = ResourceBinding {
            name: slot.to_string(),
            resource_ref: resource.to_string(),
        };
        let entry = self.entry(task);
        entry.inputs.push(binding.clone());
        entry.outputs.push(binding);
        self
    }

    pub fn bind_input(mut self, task: &str, slot: &str, resource: &str) -> Self {
        self.entry(task).inputs.push(ResourceBinding {
            name: slot.to_string(),
            resource_ref: resource.to_string(),
        });
        self
    }

    pub fn bind_output(mut self, task: &str, slot: &str, resource: &str) -> Self {
        self.entry(task).outputs.push(ResourceBinding {
            name: slot.to_string(),
            resource_ref: resource.to_string(),
        });
        self
    }

    /// Bindings declared for a pipeline task, if any
    pub fn bindings_for(&self, task: &str) -> Option<&PipelineTaskResource> {
        self.task_resources.iter().find(|r| r.name == task)
    }

    fn entry(&mut self, task: &str) -> &mut PipelineTaskResource {
        if let Some(idx) = self.task_resources.iter().position(|r| r.name == task) {
            return &mut self.task_resources[idx];
        }
        self.task_resources.push(PipelineTaskResource {
            name: task.to_string(),
            ..Default::default()
        });
        let last = self.task_resources.len() - 1;
        &mut self.task_resources[last]
    }
}
