//! Command-line argument parsing for scanforge
//!
//! Provides clap-based CLI with subcommands and verbosity control.

use crate::cli::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// scanforge - Install and run security tools against a target in parallel
#[derive(Parser, Debug)]
#[command(name = "scanforge")]
#[command(version)]
#[command(about = "Install, update and run security CLI tools against a target in parallel", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level: -q (quiet), default (normal), -v (verbose), -vv (very verbose)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Directory holding tool definition files
    #[arg(long, global = true)]
    pub tools_dir: Option<PathBuf>,

    /// Root directory for tool installations
    #[arg(long, global = true)]
    pub install_dir: Option<PathBuf>,

    /// Root directory for per-tool log files
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Status file path
    #[arg(long, global = true)]
    pub status_file: Option<PathBuf>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install or update the selected tools and run them against a target
    Run {
        /// Target passed to every tool (URL, host, domain...)
        #[arg(short, long)]
        target: String,

        /// Maximum number of tools running at once
        #[arg(short, long)]
        workers: Option<usize>,

        /// Per-tool deadline in seconds (0 disables it)
        #[arg(long)]
        timeout: Option<u64>,

        /// Run every registered tool
        #[arg(short, long, conflicts_with = "tools")]
        all: bool,

        /// Print the batch report as JSON
        #[arg(long)]
        json: bool,

        /// Tool names to run
        #[arg(value_name = "TOOLS")]
        tools: Vec<String>,
    },

    /// List registered tools and their install state
    List,

    /// Show recorded operation statuses
    Status {
        /// Only show this tool
        #[arg(value_name = "TOOL")]
        tool: Option<String>,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Display current configuration
    Config,
}

/// Verbosity level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

impl Args {
    /// Get verbosity level based on flags
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::VeryVerbose,
            }
        }
    }

    /// Check argument combinations clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if let Commands::Run { all, tools, target, .. } = &self.command {
            if target.trim().is_empty() {
                return Err("Target must not be empty.".to_string());
            }
            if !*all && tools.is_empty() {
                return Err(
                    "No tools selected. Name tools with 'scanforge run -t <TARGET> <TOOLS>...' or pass --all."
                        .to_string(),
                );
            }
        }
        Ok(())
    }

    /// Overlay command-line overrides onto a loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(dir) = &self.tools_dir {
            config.paths.tools_dir = dir.display().to_string();
        }
        if let Some(dir) = &self.install_dir {
            config.paths.install_dir = dir.display().to_string();
        }
        if let Some(dir) = &self.output_dir {
            config.paths.output_dir = dir.display().to_string();
        }
        if let Some(file) = &self.status_file {
            config.paths.status_file = file.display().to_string();
        }
        if let Commands::Run { workers, timeout, .. } = &self.command {
            if let Some(workers) = workers {
                config.execution.max_workers = *workers;
            }
            if let Some(timeout) = timeout {
                config.execution.timeout_secs = *timeout;
            }
        }
    }
}

impl Verbosity {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "quiet",
            Verbosity::Normal => "normal",
            Verbosity::Verbose => "verbose",
            Verbosity::VeryVerbose => "very_verbose",
        }
    }

    /// Log filter for this verbosity; `Normal` keeps the configured level
    pub fn log_level<'a>(&self, configured: &'a str) -> &'a str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => configured,
            Verbosity::Verbose => "debug",
            Verbosity::VeryVerbose => "trace",
        }
    }

    /// Check if should show progress bars
    pub fn show_progress(&self) -> bool {
        !matches!(self, Verbosity::Quiet)
    }

    /// Check if should show per-tool events
    pub fn show_events(&self) -> bool {
        matches!(self, Verbosity::Verbose | Verbosity::VeryVerbose)
    }
}
