//! CLI command definitions

use crate::execution::{FailurePolicy, SchedulingStrategy};
use clap::Args;

/// Run the pipeline runs declared in a manifest
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to manifest YAML file
    #[arg(short, long)]
    pub file: String,

    /// Run to start (every run in the manifest by default)
    #[arg(short, long)]
    pub run: Vec<String>,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    /// Maximum tasks running at once with the parallel-limited strategy
    #[arg(long, default_value_t = 4)]
    pub max_parallel: usize,

    /// Number of reconcile workers
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Tear down running tasks as soon as one task fails
    #[arg(long)]
    pub cancel_on_failure: bool,

    /// Default task timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Directory task steps run in
    #[arg(long)]
    pub working_dir: Option<String>,

    /// Don't save runs to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    pub fn strategy(&self) -> SchedulingStrategy {
        match self.strategy {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => {
                SchedulingStrategy::LimitedParallel(self.max_parallel.max(1))
            }
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        if self.cancel_on_failure {
            FailurePolicy::CancelRunning
        } else {
            FailurePolicy::LetRunningFinish
        }
    }
}

/// Validate a manifest and check its runs
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to manifest YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the dependency graph of a pipeline
#[derive(Debug, Args, Clone)]
pub struct GraphCommand {
    /// Path to manifest YAML file
    #[arg(short, long)]
    pub file: String,

    /// Pipeline to show (every pipeline by default)
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific history entry
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}
