//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{GraphCommand, HistoryCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Dependency-graph scheduler for build/test/deploy pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "pipeline-scheduler")]
#[command(version = "0.1.0")]
#[command(about = "Runs pipeline tasks in dependency order, in parallel where safe", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the pipeline runs of a manifest
    Run(RunCommand),

    /// Validate a manifest
    Validate(ValidateCommand),

    /// Show pipeline dependency graphs
    Graph(GraphCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
