//! CLI output formatting

use crate::core::{DependencyGraph, RunCondition, RunIssue};
use crate::execution::ReconcileEvent;
use crate::persistence::{ExecutionSummary, RunRecord};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "x ");

/// Create a spinner shown while runs are in flight
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        spinner.set_style(template);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format a run condition for display
pub fn format_condition(condition: RunCondition) -> String {
    match condition {
        RunCondition::Pending => style("PENDING").dim().to_string(),
        RunCondition::Running => style("RUNNING").yellow().to_string(),
        RunCondition::Succeeded => style("SUCCEEDED").green().to_string(),
        RunCondition::Failed => style("FAILED").red().to_string(),
        RunCondition::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn condition_icon(condition: RunCondition) -> Emoji<'static, 'static> {
    match condition {
        RunCondition::Succeeded => CHECK,
        RunCondition::Failed => CROSS,
        RunCondition::Cancelled => STOP,
        RunCondition::Running => SPINNER,
        RunCondition::Pending => INFO,
    }
}

/// Format a history entry for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    format!(
        "{} {} - {} ({}) - {} - {}/{} tasks succeeded",
        condition_icon(summary.status),
        style(&summary.execution_id.to_string()[..8]).dim(),
        style(&summary.pipeline_name).bold(),
        summary.run_id,
        format_condition(summary.status),
        summary.succeeded_tasks,
        summary.total_tasks,
    )
}

/// Format a reconcile event for display
pub fn format_reconcile_event(event: &ReconcileEvent) -> String {
    match event {
        ReconcileEvent::RunStarted {
            run_id,
            pipeline_name,
        } => format!(
            "{} Starting run {} of {}",
            ROCKET,
            style(run_id).bold(),
            style(pipeline_name).cyan()
        ),
        ReconcileEvent::TaskLaunched { run_id, task, handle } => format!(
            "{} {}/{} ({})",
            SPINNER,
            style(run_id).dim(),
            style(task).cyan(),
            style(handle).dim()
        ),
        ReconcileEvent::TaskRejected {
            run_id,
            task,
            reason,
        } => format!(
            "{} {}/{}: {}",
            CROSS,
            style(run_id).dim(),
            style(task).red(),
            style(reason).dim()
        ),
        ReconcileEvent::TaskCancelled { run_id, task } => format!(
            "{} {}/{} cancelled",
            STOP,
            style(run_id).dim(),
            style(task).yellow()
        ),
        ReconcileEvent::RunCompleted {
            run_id,
            condition,
            message,
        } => {
            let mut line = format!(
                "{} Run {} {}",
                condition_icon(*condition),
                style(run_id).bold(),
                format_condition(*condition)
            );
            if let Some(message) = message {
                line.push_str(&format!(": {}", style(message).dim()));
            }
            line
        }
    }
}

/// Format the final state of a run, one line per task
pub fn format_run_record(record: &RunRecord) -> String {
    let mut lines = vec![format!(
        "{} {} {}",
        condition_icon(record.condition),
        style(&record.run_id).bold(),
        format_condition(record.condition)
    )];

    let state = record.run_state();
    for task in &record.pipeline.tasks {
        let message = record
            .tasks
            .get(&task.name)
            .and_then(|run| run.message.as_deref())
            .map(|m| format!(" - {}", style(m).dim()))
            .unwrap_or_default();
        lines.push(format!(
            "    {:<24} {:?}{}",
            task.name,
            state.get(&task.name),
            message
        ));
    }

    lines.join("\n")
}

/// Format a dependency graph as waves of tasks that can run together
pub fn format_graph(name: &str, graph: &DependencyGraph) -> String {
    let mut lines = vec![format!(
        "{} {} ({} tasks, {} edges)",
        INFO,
        style(name).bold(),
        graph.len(),
        graph.edge_count()
    )];

    for (i, wave) in graph.waves().iter().enumerate() {
        lines.push(format!("  {} {}", style(format!("wave {}:", i + 1)).dim(), wave.join(", ")));
    }

    for (producer, consumer) in graph.edges() {
        lines.push(format!("  {} -> {}", style(producer).cyan(), consumer));
    }

    lines.join("\n")
}

/// Format a problem found while checking a run
pub fn format_issue(issue: &RunIssue) -> String {
    match &issue.task {
        Some(task) => format!(
            "{} {}/{}: {}",
            WARN,
            style(&issue.run).bold(),
            style(task).yellow(),
            issue.message
        ),
        None => format!("{} {}: {}", WARN, style(&issue.run).bold(), issue.message),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
