//! Local process backend - runs a task's steps as subprocesses

use crate::backend::{BackendConfig, BackendError, ExecutionBackend, LaunchRequest};
use crate::core::{ExecutionHandle, ExecutionStatus};
use crate::persistence::StatusReporter;
use async_trait::async_trait;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Executions {
    /// Handles launched per run, finished or not, until the run is released
    launched: HashMap<String, HashSet<ExecutionHandle>>,
    running: HashMap<ExecutionHandle, AbortHandle>,
}

/// A step with its placeholders substituted
#[derive(Debug, Clone, PartialEq, Eq)]
struct RenderedStep {
    name: String,
    program: String,
    args: Vec<String>,
}

/// Backend that runs each step of a task contract as a local command
///
/// Steps run in declaration order and the first failing step fails the
/// task. Completion is reported to the configured [`StatusReporter`].
pub struct ProcessBackend {
    config: BackendConfig,
    reporter: Arc<dyn StatusReporter>,
    executions: Arc<Mutex<Executions>>,
}

impl ProcessBackend {
    pub fn new(config: BackendConfig, reporter: Arc<dyn StatusReporter>) -> Self {
        Self {
            config,
            reporter,
            executions: Arc::new(Mutex::new(Executions::default())),
        }
    }

    /// Number of executions still in flight
    pub async fn running(&self) -> usize {
        self.executions.lock().await.running.len()
    }
}

#[async_trait]
impl ExecutionBackend for ProcessBackend {
    async fn launch(&self, request: LaunchRequest) -> Result<ExecutionHandle, BackendError> {
        let handle = request.handle.clone();

        // Held until the execution is registered, so it can't deregister first
        let mut executions = self.executions.lock().await;
        let seen = executions
            .launched
            .get(&request.run_id)
            .is_some_and(|handles| handles.contains(&handle));
        if seen {
            debug!("Execution {} already launched", handle);
            return Ok(handle);
        }

        let steps = render_steps(&request)?;
        let timeout_secs = request
            .resources
            .contract
            .timeout_secs
            .unwrap_or(self.config.timeout_secs);

        info!("Launching {} ({} steps)", handle, steps.len());

        let config = self.config.clone();
        let reporter = self.reporter.clone();
        let registry = self.executions.clone();
        let task_handle = handle.clone();
        let run_id = request.run_id.clone();

        let join = tokio::spawn(async move {
            let outcome = match timeout(
                Duration::from_secs(timeout_secs),
                run_steps(&config, &request, &steps),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(timeout_secs)),
            };

            registry.lock().await.running.remove(&task_handle);

            let (status, message) = match outcome {
                Ok(()) => {
                    info!("Execution {} succeeded", task_handle);
                    (ExecutionStatus::Succeeded, None)
                }
                Err(e) => {
                    warn!("Execution {} failed: {}", task_handle, e);
                    (ExecutionStatus::Failed, Some(e.to_string()))
                }
            };

            if let Err(e) = reporter
                .report(&request.run_id, &request.task, &task_handle, status, message)
                .await
            {
                warn!("Failed to report status of {}: {}", task_handle, e);
            }
        });

        executions
            .launched
            .entry(run_id)
            .or_default()
            .insert(handle.clone());
        executions.running.insert(handle.clone(), join.abort_handle());

        Ok(handle)
    }

    async fn cancel(&self, handle: &ExecutionHandle) -> Result<(), BackendError> {
        if let Some(execution) = self.executions.lock().await.running.remove(handle) {
            info!("Cancelling execution {}", handle);
            // Dropping the step future kills its child process
            execution.abort();
        }
        Ok(())
    }

    async fn release(&self, run_id: &str) -> Result<(), BackendError> {
        if let Some(handles) = self.executions.lock().await.launched.remove(run_id) {
            debug!("Released {} executions of run {}", handles.len(), run_id);
        }
        Ok(())
    }
}

fn render_steps(request: &LaunchRequest) -> Result<Vec<RenderedStep>, BackendError> {
    request
        .resources
        .contract
        .steps
        .iter()
        .map(|step| {
            let mut parts = step.command.iter().map(|part| substitute(part, request));
            let program = parts.next().ok_or_else(|| {
                BackendError::Spawn(format!("step '{}' has an empty command", step.name))
            })?;
            Ok(RenderedStep {
                name: step.name.clone(),
                program,
                args: parts.collect(),
            })
        })
        .collect()
}

async fn run_steps(
    config: &BackendConfig,
    request: &LaunchRequest,
    steps: &[RenderedStep],
) -> Result<(), BackendError> {
    for step in steps {
        debug!("Running step '{}' of {}", step.name, request.handle);

        let mut command = Command::new(&step.program);
        command
            .args(&step.args)
            .env("PIPELINE_RUN", &request.run_id)
            .env("PIPELINE_TASK", &request.task)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .await
            .map_err(|e| BackendError::Spawn(format!("step '{}': {}", step.name, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::StepFailed {
                step: step.name.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        debug!(
            "Step '{}' of {} returned {} bytes of output",
            step.name,
            request.handle,
            output.stdout.len()
        );
    }

    Ok(())
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{\s*([^}\s]+)\s*\}").unwrap())
}

/// Replace `${...}` placeholders with values from the launch request
///
/// Supported keys are `inputs.params.<name>` and
/// `<inputs|outputs>.resources.<slot>.<field>`, where the field is `name`,
/// `type` or one of the resource's params. Unknown keys are left as they are.
pub fn substitute(template: &str, request: &LaunchRequest) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| {
            lookup(&caps[1], request).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn lookup(key: &str, request: &LaunchRequest) -> Option<String> {
    let parts: Vec<&str> = key.split('.').collect();
    match parts.as_slice() {
        ["inputs", "params", name] => request.params.get(*name).cloned(),
        [direction @ ("inputs" | "outputs"), "resources", slot, field] => {
            let bound = if *direction == "inputs" {
                &request.resources.inputs
            } else {
                &request.resources.outputs
            };
            let resource = bound.get(*slot)?;
            match *field {
                "name" => Some(resource.name.clone()),
                "type" => Some(resource.resource_type.to_string()),
                param => resource
                    .params
                    .iter()
                    .find(|p| p.name == param)
                    .map(|p| p.value.clone()),
            }
        }
        _ => None,
    }
}
