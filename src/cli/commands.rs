//! CLI command definitions

use clap::Args;

/// Check a pipeline file and show its stages
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Where a command takes its pipeline from
#[derive(Debug, Args, Clone)]
#[group(required = true, multiple = false)]
pub struct PipelineSource {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: Option<String>,

    /// ID of a pipeline stored with `save`
    #[arg(long)]
    pub id: Option<String>,
}

/// Preview the execution stages of a pipeline
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    #[command(flatten)]
    pub source: PipelineSource,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    #[command(flatten)]
    pub source: PipelineSource,

    /// Goal text handed to every step
    #[arg(short, long)]
    pub goal: String,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

/// Store a pipeline for later use with `--id`
#[derive(Debug, Args, Clone)]
pub struct SaveCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,
}

/// List stored pipelines
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Show step outputs
    #[arg(long)]
    pub outputs: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
