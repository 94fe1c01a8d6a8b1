use anyhow::{Context, Result};
use pipeline_scheduler::backend::{BackendConfig, ProcessBackend};
use pipeline_scheduler::cli::commands::{GraphCommand, HistoryCommand, RunCommand, ValidateCommand};
use pipeline_scheduler::cli::output::*;
use pipeline_scheduler::cli::{Cli, Command};
use pipeline_scheduler::core::{DependencyGraph, Manifest, RunCondition};
use pipeline_scheduler::execution::{wait_for_completion, Controller, ControllerConfig};
use pipeline_scheduler::persistence::{
    create_summary, ExecutionSummary, HistoryBackend, InMemoryHistory, InMemoryRunStore,
    RunStore,
};
use std::sync::Arc;
use tracing::{error, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG overrides the default level
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipelines(cmd).await?,
        Command::Validate(cmd) => validate_manifest(cmd)?,
        Command::Graph(cmd) => show_graph(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

async fn open_history() -> Result<Arc<dyn HistoryBackend>> {
    #[cfg(feature = "sqlite")]
    {
        let store = pipeline_scheduler::persistence::SqliteHistoryStore::with_default_path()
            .await
            .context("Failed to open run history")?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Arc::new(InMemoryHistory::new()))
    }
}

async fn run_pipelines(cmd: &RunCommand) -> Result<()> {
    let manifest = Manifest::from_file(&cmd.file).context("Failed to load manifest")?;

    let runs: Vec<_> = if cmd.run.is_empty() {
        manifest.runs.clone()
    } else {
        cmd.run
            .iter()
            .map(|name| {
                manifest
                    .run(name)
                    .cloned()
                    .with_context(|| format!("Run '{}' not found in manifest", name))
            })
            .collect::<Result<_>>()?
    };
    if runs.is_empty() {
        anyhow::bail!("Manifest declares no runs");
    }

    let history: Arc<dyn HistoryBackend> = if cmd.no_history {
        Arc::new(InMemoryHistory::new())
    } else {
        open_history().await?
    };

    let store = Arc::new(InMemoryRunStore::new(manifest.catalog()));

    let mut backend_config = BackendConfig::new();
    if let Some(timeout) = cmd.timeout {
        backend_config = backend_config.with_timeout(timeout);
    }
    if let Some(dir) = &cmd.working_dir {
        backend_config = backend_config.with_working_dir(dir);
    }
    let backend = Arc::new(ProcessBackend::new(backend_config, store.clone()));

    let config = ControllerConfig::new()
        .with_workers(cmd.workers)
        .with_strategy(cmd.strategy())
        .with_failure_policy(cmd.failure_policy());
    let controller = Controller::new(store.clone(), backend, config);

    let spinner = create_spinner(&format!("{} run(s) in flight", runs.len()));
    let printer = spinner.clone();
    controller
        .reconciler()
        .add_event_handler(move |event| printer.println(format_reconcile_event(&event)))
        .await;

    let handle = controller.start().await;

    for run in &runs {
        let pipeline = manifest
            .pipeline(&run.pipeline_ref)
            .cloned()
            .with_context(|| format!("Pipeline '{}' not found", run.pipeline_ref))?;
        store.create_run(run.clone(), pipeline).await?;
    }

    // Ctrl-C cancels every run; the controller tears their tasks down
    let cancel_store = store.clone();
    let run_ids: Vec<String> = runs.iter().map(|r| r.name.clone()).collect();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling runs");
            for run_id in &run_ids {
                if let Err(e) = cancel_store.cancel_run(run_id).await {
                    error!("Failed to cancel {}: {}", run_id, e);
                }
            }
        }
    });

    let mut records = Vec::new();
    for run in &runs {
        records.push(wait_for_completion(store.as_ref(), &run.name).await?);
    }

    spinner.finish_and_clear();
    handle.shutdown().await;

    println!();
    for record in &records {
        println!("{}", format_run_record(record));

        let summary = create_summary(record);
        if let Err(e) = history.save_execution(&summary).await {
            warn!("Failed to save run {} to history: {}", record.run_id, e);
        } else if !cmd.no_history {
            println!(
                "  {} Saved to history (ID: {})",
                INFO,
                style(&summary.execution_id.to_string()[..8]).dim()
            );
        }
    }

    let failed = records
        .iter()
        .filter(|r| r.condition != RunCondition::Succeeded)
        .count();
    if failed > 0 {
        println!("\n{} {} of {} run(s) {}", CROSS, failed, records.len(), style("failed").red());
        std::process::exit(1);
    }

    println!(
        "\n{} {} run(s) completed {}",
        CHECK,
        records.len(),
        style("successfully").green()
    );
    Ok(())
}

fn validate_manifest(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating manifest...", INFO);

    let manifest = match Manifest::from_file(&cmd.file) {
        Ok(manifest) => manifest,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    };

    println!("  Tasks: {}", style(manifest.tasks.len()).cyan());
    println!("  Resources: {}", style(manifest.resources.len()).cyan());
    println!("  Pipelines: {}", style(manifest.pipelines.len()).cyan());
    println!("  Runs: {}", style(manifest.runs.len()).cyan());

    let issues = manifest.check_runs();

    if cmd.json {
        let data = serde_json::json!({
            "manifest": manifest,
            "issues": issues
                .iter()
                .map(|i| serde_json::json!({ "run": i.run, "task": i.task, "message": i.message }))
                .collect::<Vec<_>>(),
        });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    }

    if issues.is_empty() {
        println!("{} Manifest is valid!", CHECK);
        return Ok(());
    }

    println!("{} {} problem(s) found:", CROSS, issues.len());
    for issue in &issues {
        println!("  {}", format_issue(issue));
    }
    std::process::exit(1);
}

fn show_graph(cmd: &GraphCommand) -> Result<()> {
    let manifest = Manifest::from_file(&cmd.file).context("Failed to load manifest")?;

    let pipelines: Vec<_> = match &cmd.pipeline {
        Some(name) => vec![manifest
            .pipeline(name)
            .with_context(|| format!("Pipeline '{}' not found in manifest", name))?],
        None => manifest.pipelines.iter().collect(),
    };

    let mut json_data = Vec::new();
    for pipeline in pipelines {
        let graph = match DependencyGraph::build(pipeline) {
            Ok(graph) => graph,
            Err(e) => {
                println!("{} {}: {}", CROSS, style(&pipeline.name).bold(), style(e).red());
                continue;
            }
        };

        if cmd.json {
            json_data.push(serde_json::json!({
                "pipeline": pipeline.name,
                "waves": graph.waves(),
                "edges": graph.edges(),
            }));
        } else {
            println!("{}", format_graph(&pipeline.name, &graph));
        }
    }

    if cmd.json {
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_history().await?;

    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;

        match store.load_execution(exec_id).await? {
            Some(summary) => print_execution_details(&summary, cmd.verbose)?,
            None => println!("{} Execution not found", WARN),
        }
        return Ok(());
    }

    let executions = if let Some(pipeline_name) = &cmd.pipeline {
        let mut execs = store.list_executions(pipeline_name).await?;
        execs.truncate(cmd.limit);
        execs
    } else {
        let mut all_execs = Vec::new();
        for pipeline in &store.list_pipelines().await? {
            all_execs.extend(store.list_executions(pipeline).await?);
        }
        all_execs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all_execs.into_iter().take(cmd.limit).collect()
    };

    if executions.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for summary in &executions {
            println!("  {}", format_execution_summary(summary));
        }
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary, verbose: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Run: {}", style(&summary.run_id).bold());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_condition(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Tasks: {} succeeded, {} failed, {} total",
        style(summary.succeeded_tasks).green(),
        style(summary.failed_tasks).red(),
        summary.total_tasks
    );
    if let Some(message) = &summary.message {
        println!("  Message: {}", style(message).dim());
    }

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
