//! Resolution and validation of the resources a task receives
//!
//! A pipeline task is launched only after its supplied params and resources
//! have been resolved and checked against its contract. Params must match
//! the contract exactly (defaults aside); resources only need to cover every
//! declared slot with the right type, extras are tolerated.

use crate::core::{
    list,
    pipeline::{Param, PipelineTask},
    resource::{PipelineResource, PipelineRunSpec, ResourceBinding, ResourceType},
    task::{ResourceSlot, TaskContract},
};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Which side of a task a resource slot is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// A supplied run doesn't satisfy the task's contract
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("input param {name:?} not provided for task {task:?}")]
    MissingParam { task: String, name: String },

    #[error("task {task:?} didn't need these params but they were provided anyway: {names:?}")]
    UnexpectedParam { task: String, names: Vec<String> },

    #[error("{direction} resource {slot:?} not provided for task {task:?}")]
    MissingResource {
        task: String,
        direction: Direction,
        slot: String,
    },

    #[error("{direction} resource {slot:?} for task {task:?} should be type {expected:?} but was {actual:?}")]
    ResourceTypeMismatch {
        task: String,
        direction: Direction,
        slot: String,
        expected: ResourceType,
        actual: ResourceType,
    },
}

/// A task's bindings can't be resolved against the catalog
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("task {task:?} references unknown task template {task_ref:?}")]
    UnknownTaskRef { task: String, task_ref: String },

    #[error("{direction} {slot:?} of task {task:?} references unknown resource {resource:?}")]
    UnknownResource {
        task: String,
        direction: Direction,
        slot: String,
        resource: String,
    },
}

/// Concrete resources and params bound to one task for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTaskResources {
    pub task_name: String,
    pub contract: TaskContract,
    pub inputs: BTreeMap<String, PipelineResource>,
    pub outputs: BTreeMap<String, PipelineResource>,
    pub params: Vec<Param>,
}

impl ResolvedTaskResources {
    /// Check these resources against the contract they were resolved for
    pub fn validate(&self) -> Result<(), ContractError> {
        validate(&self.task_name, &self.params, &self.inputs, &self.outputs, &self.contract)
    }

    /// Effective parameter values: supplied values over declared defaults
    pub fn effective_params(&self) -> BTreeMap<String, String> {
        let mut values: BTreeMap<String, String> = self
            .contract
            .inputs
            .params
            .iter()
            .filter_map(|p| p.default.clone().map(|d| (p.name.clone(), d)))
            .collect();
        for param in &self.params {
            values.insert(param.name.clone(), param.value.clone());
        }
        values
    }
}

/// Validate supplied params and resources against a task contract
///
/// Checks run in a fixed order and the first violation is returned, so a
/// given malformed input always reports the same error.
pub fn validate(
    task: &str,
    params: &[Param],
    inputs: &BTreeMap<String, PipelineResource>,
    outputs: &BTreeMap<String, PipelineResource>,
    contract: &TaskContract,
) -> Result<(), ContractError> {
    let supplied: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
    let declared = contract.param_names();

    for name in list::diff_left(&declared, &supplied) {
        let has_default = contract
            .param(&name)
            .is_some_and(|spec| spec.default.is_some());
        if !has_default {
            return Err(ContractError::MissingParam {
                task: task.to_string(),
                name,
            });
        }
    }

    let extra = list::diff_left(&supplied, &declared);
    if !extra.is_empty() {
        return Err(ContractError::UnexpectedParam {
            task: task.to_string(),
            names: extra,
        });
    }

    check_slots(task, Direction::Input, &contract.inputs.resources, inputs)?;
    check_slots(task, Direction::Output, &contract.outputs.resources, outputs)?;

    Ok(())
}

fn check_slots(
    task: &str,
    direction: Direction,
    slots: &[ResourceSlot],
    supplied: &BTreeMap<String, PipelineResource>,
) -> Result<(), ContractError> {
    for slot in slots {
        let resource = supplied
            .get(&slot.name)
            .ok_or_else(|| ContractError::MissingResource {
                task: task.to_string(),
                direction,
                slot: slot.name.clone(),
            })?;

        if resource.resource_type != slot.resource_type {
            return Err(ContractError::ResourceTypeMismatch {
                task: task.to_string(),
                direction,
                slot: slot.name.clone(),
                expected: slot.resource_type,
                actual: resource.resource_type,
            });
        }
    }
    Ok(())
}

/// Resolve the contract and resource bindings of a pipeline task
///
/// `contracts` and `resources` look up catalog entries by name.
pub fn resolve<C, R>(
    task: &PipelineTask,
    run: &PipelineRunSpec,
    contracts: C,
    resources: R,
) -> Result<ResolvedTaskResources, ResolveError>
where
    C: Fn(&str) -> Option<TaskContract>,
    R: Fn(&str) -> Option<PipelineResource>,
{
    let contract = contracts(task.task_ref.as_str()).ok_or_else(|| ResolveError::UnknownTaskRef {
        task: task.name.clone(),
        task_ref: task.task_ref.clone(),
    })?;

    let (inputs, outputs) = match run.bindings_for(&task.name) {
        Some(bindings) => (
            resolve_bindings(&task.name, Direction::Input, &bindings.inputs, &resources)?,
            resolve_bindings(&task.name, Direction::Output, &bindings.outputs, &resources)?,
        ),
        None => (BTreeMap::new(), BTreeMap::new()),
    };

    Ok(ResolvedTaskResources {
        task_name: task.name.clone(),
        contract,
        inputs,
        outputs,
        params: task.params.clone(),
    })
}

fn resolve_bindings<R>(
    task: &str,
    direction: Direction,
    bindings: &[ResourceBinding],
    resources: &R,
) -> Result<BTreeMap<String, PipelineResource>, ResolveError>
where
    R: Fn(&str) -> Option<PipelineResource>,
{
    bindings
        .iter()
        .map(|binding| {
            resources(binding.resource_ref.as_str())
                .map(|r| (binding.name.clone(), r))
                .ok_or_else(|| ResolveError::UnknownResource {
                    task: task.to_string(),
                    direction,
                    slot: binding.name.clone(),
                    resource: binding.resource_ref.clone(),
                })
        })
        .collect()
}
