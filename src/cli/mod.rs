//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    HistoryCommand, ListCommand, PlanCommand, RunCommand, SaveCommand, ValidateCommand,
};
use std::ffi::OsString;

/// Pipeline execution engine for writing generation graphs
#[derive(Debug, Parser, Clone)]
#[command(name = "storyflow")]
#[command(version)]
#[command(about = "Validate, plan and run generation pipelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to engine configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Print each step output as it completes
    #[arg(short, long, global = true)]
    pub stream: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Validate a pipeline file
    Validate(ValidateCommand),

    /// Show the execution stages of a pipeline
    Plan(PlanCommand),

    /// Run a pipeline
    Run(RunCommand),

    /// Store a pipeline
    Save(SaveCommand),

    /// List stored pipelines
    List(ListCommand),

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
