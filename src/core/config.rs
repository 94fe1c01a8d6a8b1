//! Manifest configuration from YAML
//!
//! A manifest bundles everything needed to start runs: task contracts,
//! resources, pipelines, and the runs themselves.

use crate::core::{
    dag::DependencyGraph,
    pipeline::PipelineDefinition,
    resource::{PipelineResource, PipelineRunSpec},
    task::TaskContract,
    validate::resolve,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Top-level manifest loaded from YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Task contracts, referenced by pipeline tasks via `task_ref`
    #[serde(default)]
    pub tasks: Vec<TaskContract>,

    /// Concrete resources, referenced by run bindings
    #[serde(default)]
    pub resources: Vec<PipelineResource>,

    #[serde(default)]
    pub pipelines: Vec<PipelineDefinition>,

    #[serde(default)]
    pub runs: Vec<PipelineRunSpec>,
}

impl Manifest {
    /// Load a manifest from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a manifest from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(yaml)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Structural validation
    ///
    /// Graph and contract problems are not checked here: they belong to a
    /// run and are reported against it when it is reconciled.
    pub fn validate(&self) -> Result<()> {
        unique("task", self.tasks.iter().map(|t| t.name.as_str()))?;
        unique("resource", self.resources.iter().map(|r| r.name.as_str()))?;
        unique("pipeline", self.pipelines.iter().map(|p| p.name.as_str()))?;
        unique("run", self.runs.iter().map(|r| r.name.as_str()))?;

        for task in &self.tasks {
            if let Some(step) = task.steps.iter().find(|s| s.command.is_empty()) {
                anyhow::bail!("Step '{}' of task '{}' has an empty command", step.name, task.name);
            }
        }

        for run in &self.runs {
            if self.pipeline(&run.pipeline_ref).is_none() {
                anyhow::bail!(
                    "Run '{}' references non-existent pipeline '{}'",
                    run.name,
                    run.pipeline_ref
                );
            }
        }

        Ok(())
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineDefinition> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    pub fn run(&self, name: &str) -> Option<&PipelineRunSpec> {
        self.runs.iter().find(|r| r.name == name)
    }

    /// Task contracts and resources, indexed by name
    pub fn catalog(&self) -> Catalog {
        Catalog {
            tasks: self.tasks.iter().map(|t| (t.name.clone(), t.clone())).collect(),
            resources: self
                .resources
                .iter()
                .map(|r| (r.name.clone(), r.clone()))
                .collect(),
        }
    }
}

/// A problem that will make a run or one of its tasks fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIssue {
    pub run: String,

    /// The affected task, or `None` when the whole run is affected
    pub task: Option<String>,

    pub message: String,
}

impl Manifest {
    /// Check every run the way the reconciler will before launching it
    ///
    /// Graph problems are reported once per run; contract problems once
    /// per affected task.
    pub fn check_runs(&self) -> Vec<RunIssue> {
        let catalog = self.catalog();
        let mut issues = Vec::new();

        for run in &self.runs {
            let Some(pipeline) = self.pipeline(&run.pipeline_ref) else {
                continue;
            };

            if let Err(e) = DependencyGraph::build(pipeline) {
                issues.push(RunIssue {
                    run: run.name.clone(),
                    task: None,
                    message: e.to_string(),
                });
                continue;
            }

            for task in &pipeline.tasks {
                let checked = resolve(
                    task,
                    run,
                    |n| catalog.task(n).cloned(),
                    |n| catalog.resource(n).cloned(),
                )
                .map_err(|e| e.to_string())
                .and_then(|r| r.validate().map_err(|e| e.to_string()));

                if let Err(message) = checked {
                    issues.push(RunIssue {
                        run: run.name.clone(),
                        task: Some(task.name.clone()),
                        message,
                    });
                }
            }
        }

        issues
    }
}

fn unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            anyhow::bail!("Duplicate {} name: {}", kind, name);
        }
    }
    Ok(())
}

/// Definitions a run's tasks are resolved against
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub tasks: BTreeMap<String, TaskContract>,
    pub resources: BTreeMap<String, PipelineResource>,
}

impl Catalog {
    pub fn task(&self, name: &str) -> Option<&TaskContract> {
        self.tasks.get(name)
    }

    pub fn resource(&self, name: &str) -> Option<&PipelineResource> {
        self.resources.get(name)
    }

    pub fn add_task(&mut self, contract: TaskContract) {
        self.tasks.insert(contract.name.clone(), contract);
    }

    pub fn add_resource(&mut self, resource: PipelineResource) {
        self.resources.insert(resource.name.clone(), resource);
    }
}
