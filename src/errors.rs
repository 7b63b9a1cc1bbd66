//! Error types for scanforge
//!
//! One taxonomy for the whole engine. Errors local to a single tool
//! (installation, spawn, timeout) are captured into that tool's result
//! by the executor; only registry resolution errors reach the caller
//! before a batch starts.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the tool orchestration engine
#[derive(Error, Debug)]
pub enum ScanError {
    /// Requested tool name is not in the registry
    #[error("Tool '{name}' not found in the tool directory")]
    ToolNotFound { name: String },

    /// A tool definition file could not be turned into a `ToolDefinition`
    #[error("Invalid tool definition {path}: {reason}")]
    InvalidDefinition { path: PathBuf, reason: String },

    /// An install step returned non-zero
    #[error("Installation of '{tool}' failed at step '{step}' (exit code {exit_code}): {stderr}")]
    Installation {
        tool: String,
        step: String,
        exit_code: i32,
        stderr: String,
    },

    /// Spawning or waiting on a child process failed
    #[error("Execution error: {0}")]
    Execution(String),

    /// Run-command template has a malformed placeholder
    #[error("Invalid command template '{template}': {reason}")]
    Template { template: String, reason: String },

    /// Status file could not be written or read back
    #[error("Status persistence failed for {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A child process outlived its deadline
    #[error("timed out after {}", format_timeout(.after))]
    Timeout { after: Duration },

    /// The batch was cancelled while the operation was pending or running
    #[error("cancelled")]
    Cancelled,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, ScanError>;

/// Whole seconds as `Ns`, anything finer as `Nms`
fn format_timeout(after: &Duration) -> String {
    if after.subsec_nanos() == 0 {
        format!("{}s", after.as_secs())
    } else {
        format!("{}ms", after.as_millis())
    }
}

impl ScanError {
    /// True for failures that belong to one tool and must not abort a batch
    pub fn is_tool_local(&self) -> bool {
        matches!(
            self,
            ScanError::Installation { .. }
                | ScanError::Execution(_)
                | ScanError::Template { .. }
                | ScanError::Timeout { .. }
                | ScanError::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_not_found_display() {
        let err = ScanError::ToolNotFound {
            name: "nuclei".to_string(),
        };
        assert!(err.to_string().contains("nuclei"));
        assert!(!err.is_tool_local());
    }

    #[test]
    fn test_installation_error_display() {
        let err = ScanError::Installation {
            tool: "ffuf".to_string(),
            step: "go build".to_string(),
            exit_code: 2,
            stderr: "no Go files".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("go build"));
        assert!(text.contains("exit code 2"));
        assert!(text.contains("no Go files"));
        assert!(err.is_tool_local());
    }

    #[test]
    fn test_timeout_display() {
        let err = ScanError::Timeout {
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "timed out after 30s");

        let err = ScanError::Timeout {
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "timed out after 250ms");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ScanError = io.into();
        assert!(matches!(err, ScanError::Io(_)));
    }
}
