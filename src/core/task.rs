//! Task contracts - what a task template declares it needs

use crate::core::resource::ResourceType;
use serde::{Deserialize, Serialize};

/// The declared parameter/resource contract of a task template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContract {
    /// Task template name (what `task_ref` points at)
    pub name: String,

    /// Declared inputs
    #[serde(default)]
    pub inputs: TaskInputs,

    /// Declared outputs
    #[serde(default)]
    pub outputs: TaskOutputs,

    /// Steps run by the process backend, in order
    #[serde(default)]
    pub steps: Vec<StepSpec>,

    /// Per-task timeout (overrides the backend default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInputs {
    #[serde(default)]
    pub params: Vec<ParamSpec>,

    #[serde(default)]
    pub resources: Vec<ResourceSlot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutputs {
    #[serde(default)]
    pub resources: Vec<ResourceSlot>,
}

/// A declared input parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Value used when a run doesn't supply one
    #[serde(default)]
    pub default: Option<String>,
}

/// A declared resource slot with its expected type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSlot {
    pub name: String,

    #[serde(rename = "type")]
    pub resource_type: ResourceType,
}

/// A single command executed as part of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,

    /// Program followed by its arguments
    pub command: Vec<String>,
}

impl TaskContract {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: TaskInputs::default(),
            outputs: TaskOutputs::default(),
            steps: Vec::new(),
            timeout_secs: None,
        }
    }

    /// Declare a required parameter
    pub fn with_param(mut self, name: &str) -> Self {
        self.inputs.params.push(ParamSpec {
            name: name.to_string(),
            description: None,
            default: None,
        });
        self
    }

    /// Declare a parameter with a default value
    pub fn with_default_param(mut self, name: &str, default: &str) -> Self {
        self.inputs.params.push(ParamSpec {
            name: name.to_string(),
            description: None,
            default: Some(default.to_string()),
        });
        self
    }

    pub fn with_input(mut self, name: &str, resource_type: ResourceType) -> Self {
        self.inputs.resources.push(ResourceSlot {
            name: name.to_string(),
            resource_type,
        });
        self
    }

    pub fn with_output(mut self, name: &str, resource_type: ResourceType) -> Self {
        self.outputs.resources.push(ResourceSlot {
            name: name.to_string(),
            resource_type,
        });
        self
    }

    pub fn with_step(mut self, name: &str, command: &[&str]) -> Self {
        self.steps.push(StepSpec {
            name: name.to_string(),
            command: command.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    /// Names of every declared parameter, in declaration order
    pub fn param_names(&self) -> Vec<&str> {
        self.inputs.params.iter().map(|p| p.name.as_str()).collect()
    }

    /// Look up a declared parameter
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.inputs.params.iter().find(|p| p.name == name)
    }
}
