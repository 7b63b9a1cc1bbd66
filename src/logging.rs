//! Tracing subscriber setup
//!
//! Stderr gets human-readable events; an optional log file gets the same
//! events without ANSI colors through a non-blocking writer.

use crate::errors::{Result, ScanError};
use std::fs::{create_dir_all, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// What `init` needs to know
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Also write events to this file
    pub file: Option<PathBuf>,
}

/// Keeps the file sink flushing; hold it until the process exits.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
    log_file_path: Option<PathBuf>,
}

impl LoggingGuard {
    pub fn log_file_path(&self) -> Option<&Path> {
        self.log_file_path.as_deref()
    }
}

/// Install the global subscriber. Errors when called twice.
pub fn init(settings: &LoggingSettings) -> Result<LoggingGuard> {
    if LOGGER_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(ScanError::Config("logging already initialized".to_string()));
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| ScanError::Config(format!("failed to configure tracing level: {}", e)))?;

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, file_guard) = match &settings.file {
        Some(path) => {
            let (writer, guard) = open_log_writer(path)?;
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ScanError::Config(format!("failed to install subscriber: {}", e)))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
        log_file_path: settings.file.clone(),
    })
}

/// Open `log_file` for appending behind a non-blocking writer
fn open_log_writer(log_file: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    if let Some(directory) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(directory).map_err(|e| {
            ScanError::Config(format!(
                "failed to create log directory {}: {}",
                directory.display(),
                e
            ))
        })?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|e| {
            ScanError::Config(format!("failed to open log file {}: {}", log_file.display(), e))
        })?;

    Ok(tracing_appender::non_blocking(file))
}
