use anyhow::{Context, Result};
use std::sync::Arc;
use storyflow::cli::commands::{
    HistoryCommand, ListCommand, PipelineSource, PlanCommand, RunCommand, SaveCommand,
    ValidateCommand,
};
use storyflow::cli::output::*;
use storyflow::cli::{Cli, Command};
use storyflow::core::config::{EngineConfig, PipelineConfig};
use storyflow::core::{PipelineDefinition, RunStatus};
use storyflow::error::EngineError;
use storyflow::execution::{validate, ExecutionEngine, PlanTarget};
use storyflow::handlers::config::registry_from_configs;
use storyflow::handlers::{EchoHandler, HandlerRegistry};
use storyflow::persistence::{InMemoryPersistence, PersistenceBackend, RunRecord, SqliteRunStore};
use storyflow::registry::RunEvent;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path).context("Failed to load engine config")?,
        None => EngineConfig::default(),
    };

    match &cli.command {
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Plan(cmd) => plan_pipeline(cmd, &config).await?,
        Command::Run(cmd) => run_pipeline(cmd, &cli, &config).await?,
        Command::Save(cmd) => save_pipeline(cmd, &config).await?,
        Command::List(cmd) => list_pipelines(cmd, &config).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

async fn open_store(persistent: bool) -> Result<Arc<dyn PersistenceBackend>> {
    if persistent {
        Ok(Arc::new(SqliteRunStore::with_default_path().await?))
    } else {
        Ok(Arc::new(InMemoryPersistence::new()))
    }
}

/// Every role of the pipeline gets an echo handler
fn echo_handlers(pipeline: &PipelineDefinition) -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    for step in &pipeline.steps {
        handlers.register(step.role.clone(), Arc::new(EchoHandler));
    }
    handlers
}

/// Pipeline plus the handlers to run it with
async fn load_source(
    source: &PipelineSource,
    store: &Arc<dyn PersistenceBackend>,
) -> Result<(PipelineDefinition, HandlerRegistry)> {
    if let Some(file) = &source.file {
        let config = PipelineConfig::from_file(file).context("Failed to load pipeline config")?;
        let pipeline = config.to_pipeline();
        if config.handlers.is_empty() {
            warn!("No handlers configured, every role will echo its input");
            let handlers = echo_handlers(&pipeline);
            return Ok((pipeline, handlers));
        }
        return Ok((pipeline, registry_from_configs(&config.handlers)));
    }

    let id = source.id.as_deref().unwrap_or_default();
    let pipeline = store
        .load_pipeline(id)
        .await?
        .with_context(|| format!("No stored pipeline with id '{}'", id))?;
    warn!("Stored pipelines carry no handlers, every role will echo its input");
    let handlers = echo_handlers(&pipeline);
    Ok((pipeline, handlers))
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let config = match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => config,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    };

    let pipeline = config.to_pipeline();
    let plan = validate(&pipeline);

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("  Name: {}", style(&pipeline.name).bold());
        println!("  Steps: {}", style(pipeline.steps.len()).cyan());
        println!("  Edges: {}", style(pipeline.edges.len()).cyan());
        println!("  Handlers: {}", style(config.handlers.len()).cyan());
        println!("{}", format_plan(&plan));
    }

    if plan.is_valid() {
        println!("{} Pipeline is valid!", CHECK);
        Ok(())
    } else {
        println!("{} Pipeline has {} issue(s)", CROSS, plan.issues.len());
        std::process::exit(1);
    }
}

async fn plan_pipeline(cmd: &PlanCommand, config: &EngineConfig) -> Result<()> {
    let plan = if let Some(file) = &cmd.source.file {
        let pipeline = PipelineConfig::from_file(file)
            .context("Failed to load pipeline config")?
            .to_pipeline();
        validate(&pipeline)
    } else {
        let id = cmd.source.id.as_deref().unwrap_or_default();
        let engine = ExecutionEngine::builder()
            .store(open_store(true).await?)
            .config(config.clone())
            .build();
        engine.plan(PlanTarget::Id(id)).await?
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("{} Execution plan ({} stages):", INFO, plan.stages.len());
        println!("{}", format_plan(&plan));
    }
    Ok(())
}

async fn run_pipeline(cmd: &RunCommand, cli: &Cli, config: &EngineConfig) -> Result<()> {
    let store = open_store(!cmd.no_history).await?;
    let (pipeline, handlers) = load_source(&cmd.source, &store).await?;

    println!("{} Loaded pipeline: {}", INFO, style(&pipeline.name).bold());

    let engine = ExecutionEngine::builder()
        .handlers(handlers)
        .store(store)
        .config(config.clone())
        .build();

    let run_id = match engine.start(&pipeline, &cmd.goal).await {
        Ok(run_id) => run_id,
        Err(EngineError::InvalidPipeline(issues)) => {
            println!("{} Pipeline is not valid:", CROSS);
            for issue in issues {
                println!("  {} {}", WARN, style(issue).yellow());
            }
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let progress = create_progress_bar();
    let mut events = engine.stream(run_id).await?;
    while let Some(envelope) = events.recv().await {
        progress.println(format_run_event(&envelope.event));
        match &envelope.event {
            RunEvent::NodeStart { role, .. } => progress.set_message(role.clone()),
            RunEvent::NodeComplete {
                progress: percent,
                output,
                ..
            } => {
                progress.set_position(u64::from(*percent));
                if cli.stream {
                    progress.println(format_output(&output.text, 10));
                }
            }
            RunEvent::Completed { progress: percent } => progress.set_position(u64::from(*percent)),
            _ => {}
        }
    }
    progress.finish_and_clear();

    let result = engine.result(run_id).await?;
    println!("{}", style(separator()).dim());
    for (step_id, output) in &result.outputs {
        println!("{} {}", style(step_id).bold(), style(format!("({} chars)", output.text.chars().count())).dim());
        println!("{}", format_output(&output.text, 20));
        println!();
    }

    if !cmd.no_history {
        println!("{} Run saved to history (ID: {})", INFO, style(run_id).dim());
    }

    if result.status == RunStatus::Completed {
        println!(
            "{} {} completed {}",
            CHECK,
            style(&pipeline.name).bold(),
            style("successfully").green()
        );
        Ok(())
    } else {
        println!("{} {} {}", CROSS, style(&pipeline.name).bold(), style("failed").red());
        if let Some(message) = &result.metadata.error {
            error!("{}", message);
        }
        std::process::exit(1);
    }
}

async fn save_pipeline(cmd: &SaveCommand, config: &EngineConfig) -> Result<()> {
    let pipeline = PipelineConfig::from_file(&cmd.file)
        .context("Failed to load pipeline config")?
        .to_pipeline();

    let engine = ExecutionEngine::builder()
        .store(open_store(true).await?)
        .config(config.clone())
        .build();

    let plan = engine.validate(&pipeline);
    for issue in &plan.issues {
        println!("{} {}", WARN, style(issue).yellow());
    }

    engine.save_pipeline(&pipeline).await?;
    println!("{} Saved pipeline {}", CHECK, style(&pipeline.id).bold());
    Ok(())
}

async fn list_pipelines(cmd: &ListCommand, config: &EngineConfig) -> Result<()> {
    let engine = ExecutionEngine::builder()
        .store(open_store(true).await?)
        .config(config.clone())
        .build();
    let pipelines = engine.list_pipelines().await?;

    if cmd.json {
        let data: Vec<_> = pipelines
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id,
                    "name": p.name,
                    "steps": p.steps.len(),
                    "edges": p.edges.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "pipelines": data }))?);
        return Ok(());
    }

    if pipelines.is_empty() {
        println!("{} No stored pipelines", INFO);
        return Ok(());
    }

    println!("{} Stored pipelines:", INFO);
    for pipeline in &pipelines {
        println!(
            "  {} {} ({} steps)",
            style(&pipeline.id).bold(),
            style(&pipeline.name).dim(),
            style(pipeline.steps.len()).cyan()
        );
    }
    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_store(true).await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(record) if cmd.json => println!("{}", serde_json::to_string_pretty(&record)?),
            Some(record) => print_run_details(&record, cmd.outputs),
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let records = store.list_runs(cmd.limit).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "runs": records }))?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for record in &records {
        println!("  {}", format_run_record(record));
    }
    Ok(())
}

fn print_run_details(record: &RunRecord, show_outputs: bool) {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(record.run_id).cyan());
    println!("  Pipeline: {} ({})", style(&record.pipeline_name).bold(), record.pipeline_id);
    println!("  Goal: {}", record.goal);
    println!("  Status: {}", format_status(record.status));
    println!("  Started: {}", style(record.started_at.to_rfc3339()).dim());
    if let Some(finished) = record.finished_at {
        println!("  Finished: {}", style(finished.to_rfc3339()).dim());
        if let Ok(duration) = finished.signed_duration_since(record.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Progress: {} ({}/{})",
        style(format!("{}%", record.progress)).cyan(),
        record.completed_nodes,
        record.total_nodes
    );
    if let Some(error) = &record.error {
        println!("  Error: {}", style(error).red());
    }

    if show_outputs {
        for (step_id, output) in &record.outputs {
            println!("\n  {}", style(step_id).bold());
            for line in format_output(&output.text, 20).lines() {
                println!("    {}", line);
            }
        }
    }
}
