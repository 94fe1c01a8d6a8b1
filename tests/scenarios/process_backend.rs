//! Manifests run for real through the process backend

#![cfg(unix)]

use pipeline_scheduler::backend::{BackendConfig, ProcessBackend};
use pipeline_scheduler::core::{Manifest, RunCondition};
use pipeline_scheduler::execution::{wait_for_completion, Controller, ControllerConfig};
use pipeline_scheduler::persistence::InMemoryRunStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const MANIFEST: &str = r#"
tasks:
  - name: append
    inputs:
      params:
        - name: label
        - name: log
          default: order.log
    steps:
      - name: append-label
        command: ["sh", "-c", "echo ${inputs.params.label} >> ${inputs.params.log}"]
  - name: fail
    steps:
      - name: exit
        command: ["sh", "-c", "echo broken >&2; exit 4"]

pipelines:
  - name: diamond
    tasks:
      - name: first
        task_ref: append
        params:
          - name: label
            value: first
      - name: left
        task_ref: append
        resource_dependencies:
          - name: workspace
            provided_by: [first]
        params:
          - name: label
            value: left
      - name: right
        task_ref: append
        resource_dependencies:
          - name: workspace
            provided_by: [first]
        params:
          - name: label
            value: right
      - name: last
        task_ref: append
        resource_dependencies:
          - name: workspace
            provided_by: [left, right]
        params:
          - name: label
            value: last
  - name: broken
    tasks:
      - name: explode
        task_ref: fail
      - name: after
        task_ref: append
        resource_dependencies:
          - name: workspace
            provided_by: [explode]
        params:
          - name: label
            value: after

runs:
  - name: diamond-run
    pipeline_ref: diamond
  - name: broken-run
    pipeline_ref: broken
"#;

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pipeline-scheduler-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

async fn run(run_name: &str, dir: &Path) -> pipeline_scheduler::persistence::RunRecord {
    let manifest = Manifest::from_yaml(MANIFEST).unwrap();
    let spec = manifest.run(run_name).unwrap().clone();
    let pipeline = manifest.pipeline(&spec.pipeline_ref).unwrap().clone();

    let store = Arc::new(InMemoryRunStore::new(manifest.catalog()));
    let backend = Arc::new(ProcessBackend::new(
        BackendConfig::new().with_working_dir(dir).with_timeout(30),
        store.clone(),
    ));
    let controller = Controller::new(store.clone(), backend, ControllerConfig::new());
    let handle = controller.start().await;

    store.create_run(spec, pipeline).await.unwrap();
    let record = tokio::time::timeout(
        Duration::from_secs(30),
        wait_for_completion(store.as_ref(), run_name),
    )
    .await
    .expect("run did not finish in time")
    .unwrap();

    handle.shutdown().await;
    record
}

/// Test that steps run in dependency order with params substituted
#[tokio::test]
async fn test_diamond_manifest_runs_steps_in_order() {
    let dir = scratch_dir();

    let record = run("diamond-run", &dir).await;

    assert_eq!(record.condition, RunCondition::Succeeded);
    let log = std::fs::read_to_string(dir.join("order.log")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "first");
    assert_eq!(lines[3], "last");
    assert!(lines[1..3].contains(&"left"));
    assert!(lines[1..3].contains(&"right"));

    let _ = std::fs::remove_dir_all(&dir);
}

/// Test that a failing step fails the run with its exit code
#[tokio::test]
async fn test_failing_step_fails_run() {
    let dir = scratch_dir();

    let record = run("broken-run", &dir).await;

    assert_eq!(record.condition, RunCondition::Failed);
    let message = record.message.unwrap_or_default();
    assert!(message.contains("explode"), "unexpected message: {}", message);
    assert!(message.contains("code 4"), "unexpected message: {}", message);
    assert!(!dir.join("order.log").exists());

    let _ = std::fs::remove_dir_all(&dir);
}
