//! CLI output formatting

use crate::core::RunStatus;
use crate::execution::Plan;
use crate::persistence::RunRecord;
use crate::registry::RunEvent;
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
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Progress bar over the 0-100 run progress
pub fn create_progress_bar() -> ProgressBar {
    let progress = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Completed => style("COMPLETED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// One history line
pub fn format_run_record(record: &RunRecord) -> String {
    let status_icon = match record.status {
        RunStatus::Completed => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
    };

    format!(
        "{} {} - {} - {} ({}/{}) - {}",
        status_icon,
        style(short_id(&record.run_id.to_string())).dim(),
        style(&record.pipeline_name).bold(),
        format_status(record.status),
        record.completed_nodes,
        record.total_nodes,
        style(format!("{}%", record.progress)).cyan()
    )
}

/// Format a run event for display
pub fn format_run_event(event: &RunEvent) -> String {
    match event {
        RunEvent::Status {
            status,
            progress,
            current_agent,
        } => format!(
            "{} {} at {}%{}",
            INFO,
            format_status(*status),
            progress,
            current_agent
                .as_ref()
                .map(|a| format!(" ({})", a))
                .unwrap_or_default()
        ),
        RunEvent::NodeStart { step_id, role } => {
            format!("{} {} {}", SPINNER, style(step_id).cyan(), style(role).dim())
        }
        RunEvent::NodeComplete {
            step_id, progress, ..
        } => format!(
            "{} {} {}",
            CHECK,
            style(step_id).green(),
            style(format!("{}%", progress)).dim()
        ),
        RunEvent::NodeError {
            step_id, message, ..
        } => format!("{} {}: {}", CROSS, style(step_id).red(), style(message).dim()),
        RunEvent::NodeSkipped { step_id, .. } => {
            format!("{} {} {}", SKIP, style(step_id).dim(), style("skipped").dim())
        }
        RunEvent::Completed { .. } => {
            format!("{} Run completed {}", CHECK, style("successfully").green())
        }
        RunEvent::Error { message } => {
            format!("{} Run {}: {}", CROSS, style("failed").red(), message)
        }
    }
}

/// Stages and issues of a plan
pub fn format_plan(plan: &Plan) -> String {
    let mut lines = Vec::new();
    for stage in &plan.stages {
        let steps: Vec<String> = stage
            .steps
            .iter()
            .map(|s| format!("{} ({})", style(&s.id).cyan(), style(&s.role).dim()))
            .collect();
        lines.push(format!("  Stage {}: {}", stage.index, steps.join(", ")));
    }
    for issue in &plan.issues {
        lines.push(format!("  {} {}", WARN, style(issue).yellow()));
    }
    lines.join("\n")
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

/// Horizontal rule as wide as the terminal
pub fn separator() -> String {
    let width = term_size::dimensions_stdout().map(|(w, _)| w).unwrap_or(80);
    "─".repeat(width.min(120))
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

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
