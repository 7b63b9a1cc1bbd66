//! Terminal presentation
//!
//! Progress bar for running batches plus the colored tables printed by
//! `run`, `list` and `status`.

use crate::status::{OperationState, OperationStatus, StatusSummary};
use crate::telemetry::TelemetryEvent;
use crate::tools::{BatchReport, InstallationManager, PrepareAction, ToolDefinition, UpdateOutcome};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar driven by telemetry events
#[derive(Clone)]
pub struct BatchProgress {
    bar: ProgressBar,
    show_events: bool,
}

impl BatchProgress {
    /// Create a bar; hidden when `visible` is false
    pub fn new(visible: bool, show_events: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} tools | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar, show_events }
    }

    /// Feed one telemetry event into the bar
    pub fn handle(&self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::BatchStarted {
                target, tool_count, ..
            } => {
                self.bar.set_length(*tool_count as u64);
                self.bar.set_message(format!("preparing tools for {}", target));
            }
            TelemetryEvent::ToolPrepared { tool, action, .. } => {
                if self.show_events {
                    self.bar
                        .println(format!("{} {}", "prepared".dimmed(), describe_action(tool, action)));
                }
            }
            TelemetryEvent::ToolStarted { tool, .. } => {
                self.bar.set_message(format!("running {}", tool));
            }
            TelemetryEvent::ToolCompleted {
                tool,
                status,
                exit_code,
                ..
            } => {
                self.bar.inc(1);
                if self.show_events {
                    self.bar.println(format!(
                        "{} {} (exit code {})",
                        colored_state(*status),
                        tool,
                        exit_code
                    ));
                }
            }
            TelemetryEvent::ChildTerminated { tool, reason, .. } => {
                self.bar
                    .println(format!("{} {}: {}", "killed".red(), tool, reason));
            }
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn describe_action(tool: &str, action: &PrepareAction) -> String {
    match action {
        PrepareAction::Installed => format!("{} (installed)", tool),
        PrepareAction::Updated(UpdateOutcome::Updated) => format!("{} (updated)", tool),
        PrepareAction::Updated(UpdateOutcome::Skipped) => format!("{} (up to date)", tool),
        PrepareAction::Updated(UpdateOutcome::Failed(_)) => {
            format!("{} (update failed, using installed version)", tool)
        }
        PrepareAction::Unchanged => format!("{} (unchanged)", tool),
    }
}

fn colored_state(state: OperationState) -> ColoredString {
    match state {
        OperationState::Completed => state.as_str().green(),
        OperationState::Failed => state.as_str().yellow(),
        OperationState::ExecutionError => state.as_str().red(),
        OperationState::Initializing | OperationState::Running => state.as_str().cyan(),
    }
}

/// Print the results table and summary of a batch
pub fn print_report(report: &BatchReport) {
    println!("\n{} {}", "Target:".bold(), report.target);
    println!(
        "{:<20} {:<16} {:>6} {:>10}  {}",
        "TOOL".bold(),
        "STATUS".bold(),
        "EXIT".bold(),
        "TIME".bold(),
        "LOG / ERROR".bold()
    );

    for result in &report.results {
        let detail = match (&result.error, &result.log_path) {
            (Some(error), _) => error.red().to_string(),
            (None, Some(path)) => path.display().to_string().dimmed().to_string(),
            (None, None) => String::new(),
        };
        println!(
            "{:<20} {:<16} {:>6} {:>9.1}s  {}",
            result.tool,
            colored_state(result.status),
            result.exit_code,
            result.duration_ms as f64 / 1000.0,
            detail
        );
    }

    for skipped in &report.skipped {
        println!(
            "{:<20} {:<16} {:>6} {:>10}  {}",
            skipped.tool,
            "Skipped".red(),
            "-",
            "-",
            skipped.reason.red()
        );
    }

    print_summary(&report.summary);
    println!(
        "{}",
        format!("Finished in {:.1}s", report.elapsed_ms as f64 / 1000.0).dimmed()
    );
}

/// Print the aggregate counts line
pub fn print_summary(summary: &StatusSummary) {
    println!(
        "\n{} total: {}, {}: {}, {}: {}, {}: {}",
        "Summary".bold(),
        summary.total,
        "completed".green(),
        summary.completed,
        "failed".red(),
        summary.failed,
        "in progress".cyan(),
        summary.in_progress
    );
}

/// Print registered tools with their install state
pub fn print_tool_list(tools: &[&ToolDefinition], installer: &InstallationManager) {
    if tools.is_empty() {
        println!("{}", "No tools registered.".yellow());
        return;
    }

    println!(
        "{:<20} {:<14} {}",
        "TOOL".bold(),
        "INSTALLED".bold(),
        "DESCRIPTION".bold()
    );
    for tool in tools {
        let installed = if installer.is_installed(tool) {
            "yes".green()
        } else {
            "no".yellow()
        };
        println!(
            "{:<20} {:<14} {}",
            tool.name,
            installed,
            tool.description.as_deref().unwrap_or("").dimmed()
        );
    }
}

/// Print recorded operations
pub fn print_statuses(operations: &[OperationStatus]) {
    if operations.is_empty() {
        println!("{}", "No operations recorded.".yellow());
        return;
    }

    for op in operations {
        let duration = op
            .duration()
            .map(|d| format!("{:.1}s", d.num_milliseconds() as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<16} {:>8}  {}",
            op.tool_name.bold(),
            colored_state(op.status),
            duration,
            op.command.dimmed()
        );
        if let Some(result) = &op.result {
            if let Some(code) = result.exit_code {
                println!("    exit code: {}", code);
            }
            if let Some(path) = &result.log_path {
                println!("    log: {}", path);
            }
            if let Some(error) = &result.error {
                println!("    error: {}", error.red());
            }
        }
    }
}

/// Print load warnings
pub fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }
}
