//! Tool definition and execution types
//!
//! Core value types shared by the registry, installer and executor.

use crate::status::OperationState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Exit code reported when the engine itself failed before or while
/// running a tool (spawn error, timeout, cancellation, bad template)
pub const ENGINE_FAILURE_EXIT_CODE: i32 = -1;

/// Immutable description of one external tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique registry key
    pub name: String,

    /// Shell commands run in order, inside the shared install root
    pub install_steps: Vec<String>,

    /// Command template containing a `{target}` placeholder
    pub run_command_template: String,

    /// Per-tool subdirectory of the output root
    pub output_dir: String,

    /// Human readable summary shown by `list`
    pub description: Option<String>,
}

impl ToolDefinition {
    /// Create a tool with no install steps whose output directory is its name
    pub fn new(name: impl Into<String>, run_command_template: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            output_dir: name.clone(),
            name,
            install_steps: Vec::new(),
            run_command_template: run_command_template.into(),
            description: None,
        }
    }

    /// Set install steps
    pub fn with_install_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.install_steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Set output directory
    pub fn with_output_dir(mut self, output_dir: impl Into<String>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Outcome of running one tool in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Tool name
    pub tool: String,

    /// Formatted command (raw template if formatting failed)
    pub command: String,

    /// Process exit code, or `ENGINE_FAILURE_EXIT_CODE`
    pub exit_code: i32,

    /// Log file receiving stdout and stderr
    pub log_path: Option<PathBuf>,

    /// Engine-level error text
    pub error: Option<String>,

    /// Terminal state recorded for the operation
    pub status: OperationState,

    /// Wall time spent in the worker, including the wait for a slot
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Result for a process that ran to completion
    pub fn exited(
        tool: String,
        command: String,
        exit_code: i32,
        log_path: PathBuf,
        duration: Duration,
    ) -> Self {
        let status = if exit_code == 0 {
            OperationState::Completed
        } else {
            OperationState::Failed
        };
        Self {
            tool,
            command,
            exit_code,
            log_path: Some(log_path),
            error: None,
            status,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Result for an engine-level failure
    pub fn engine_error(
        tool: String,
        command: String,
        error: String,
        log_path: Option<PathBuf>,
        duration: Duration,
    ) -> Self {
        Self {
            tool,
            command,
            exit_code: ENGINE_FAILURE_EXIT_CODE,
            log_path,
            error: Some(error),
            status: OperationState::ExecutionError,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// True when the tool exited with code 0
    pub fn is_success(&self) -> bool {
        self.status == OperationState::Completed
    }
}

/// Result of a best-effort update
///
/// Update failures are values, not errors: callers log them and move on
/// so an unreachable remote never blocks a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Install directory carries no version-control metadata
    Skipped,
    /// Pull/sync command succeeded
    Updated,
    /// Pull/sync command failed or could not be spawned
    Failed(String),
}

/// What `prepare` did for a tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareAction {
    /// Install steps were run
    Installed,
    /// Tool was already installed; an update was attempted
    Updated(UpdateOutcome),
    /// Tool was already installed and updates are disabled
    Unchanged,
}
