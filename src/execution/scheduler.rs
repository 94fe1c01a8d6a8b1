//! Readiness engine - determines which tasks to run next

use crate::core::{DependencyGraph, RunCondition, RunState, TaskState};
use std::collections::BTreeSet;

/// Tasks eligible to launch
///
/// A task is ready when it hasn't started and every producer has succeeded.
/// Tasks with several producers wait for all of them. Nothing is ready once
/// the run has failed. The result only depends on its inputs, so repeated
/// evaluation of an unchanged run yields the same set.
pub fn ready_tasks(graph: &DependencyGraph, state: &RunState) -> BTreeSet<String> {
    if aggregate_condition(graph, state) == RunCondition::Failed {
        return BTreeSet::new();
    }

    graph
        .nodes()
        .filter(|task| state.get(task) == TaskState::NotStarted)
        .filter(|task| {
            graph
                .producers(task)
                .all(|p| state.get(p) == TaskState::Succeeded)
        })
        .map(String::from)
        .collect()
}

/// Run-wide condition derived from task states
///
/// Only ever `Running`, `Succeeded` or `Failed`.
pub fn aggregate_condition(graph: &DependencyGraph, state: &RunState) -> RunCondition {
    let mut all_succeeded = true;
    for task in graph.nodes() {
        match state.get(task) {
            TaskState::Failed => return RunCondition::Failed,
            TaskState::Succeeded => {}
            TaskState::NotStarted | TaskState::Running => all_succeeded = false,
        }
    }

    if all_succeeded {
        RunCondition::Succeeded
    } else {
        RunCondition::Running
    }
}

/// Strategy for how many ready tasks are launched at once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// One task at a time, in name order
    Sequential,

    /// Every ready task
    Parallel,

    /// At most N tasks running at once
    LimitedParallel(usize),
}

impl Default for SchedulingStrategy {
    fn default() -> Self {
        SchedulingStrategy::Parallel
    }
}

impl SchedulingStrategy {
    /// Pick which of the ready tasks to launch given how many are running
    pub fn select(&self, ready: BTreeSet<String>, running: usize) -> Vec<String> {
        let limit = match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => return ready.into_iter().collect(),
            SchedulingStrategy::LimitedParallel(max) => *max,
        };

        ready
            .into_iter()
            .take(limit.saturating_sub(running))
            .collect()
    }
}
