//! Tool orchestration
//!
//! Loads tool definitions, installs or updates them, and runs them against
//! a target with bounded parallelism:
//! - Tool registry (definition files, validation, resolution)
//! - Installation manager (install steps, best-effort updates)
//! - Parallel executor (worker pool, timeout, cancellation)
//! - Tool runtime coordinator

pub mod types;
pub mod command;
pub mod registry;
pub mod process;
pub mod installer;
pub mod executor;
pub mod runtime;

// Re-export commonly used types
pub use types::{ExecutionResult, PrepareAction, ToolDefinition, UpdateOutcome};
pub use registry::{dedupe_by_name, RegistryLoad, ToolRegistry};
pub use process::{CancelHandle, ChildTracker};
pub use installer::InstallationManager;
pub use executor::{ExecutorOptions, ParallelExecutor, DEFAULT_MAX_WORKERS};
pub use runtime::{BatchReport, SkippedTool, ToolRuntime};
