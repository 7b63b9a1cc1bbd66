//! Configuration management for scanforge
//!
//! Provides TOML-based configuration with defaults and validation.
//! Location: ~/.scanforge/config.toml

use crate::errors::{Result, ScanError};
use crate::status::DEFAULT_STATUS_FILE;
use crate::tools::executor::DEFAULT_MAX_WORKERS;
use crate::tools::installer::DEFAULT_UPDATE_COMMAND;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Complete configuration for scanforge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
}

/// File system paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub tools_dir: String,
    pub install_dir: String,
    pub output_dir: String,
    pub status_file: String,
}

/// Batch execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_workers: usize,
    /// Per-tool deadline; 0 disables it
    pub timeout_secs: u64,
    pub update_on_prepare: bool,
    pub update_command: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            tools_dir: "tools".to_string(),
            install_dir: "tools_installations".to_string(),
            output_dir: "outputs".to_string(),
            status_file: DEFAULT_STATUS_FILE.to_string(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            timeout_secs: 0,
            update_on_prepare: true,
            update_command: DEFAULT_UPDATE_COMMAND.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(config_path) = path {
            Self::load_from_file(config_path)
        } else {
            Self::load_default()
        }
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ScanError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ScanError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load default configuration from standard location or use built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(config_path) = Self::default_path() {
            if config_path.exists() {
                return Self::load_from_file(&config_path);
            }
        }

        Ok(Config::default())
    }

    /// `~/.scanforge/config.toml`, when a home directory is known
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".scanforge").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.execution.max_workers == 0 {
            return Err(ScanError::Config(
                "max_workers must be greater than 0".to_string(),
            ));
        }

        let paths = [
            ("tools_dir", &self.paths.tools_dir),
            ("install_dir", &self.paths.install_dir),
            ("output_dir", &self.paths.output_dir),
            ("status_file", &self.paths.status_file),
        ];
        for (key, value) in paths {
            if value.trim().is_empty() {
                return Err(ScanError::Config(format!("paths.{} must not be empty", key)));
            }
        }

        if self.execution.update_command.trim().is_empty() {
            return Err(ScanError::Config(
                "update_command must not be empty".to_string(),
            ));
        }

        if EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(ScanError::Config(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Serialize as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ScanError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Expand tilde in paths
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    pub fn tools_dir(&self) -> PathBuf {
        Self::expand_path(&self.paths.tools_dir)
    }

    pub fn install_dir(&self) -> PathBuf {
        Self::expand_path(&self.paths.install_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        Self::expand_path(&self.paths.output_dir)
    }

    pub fn status_file(&self) -> PathBuf {
        Self::expand_path(&self.paths.status_file)
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.logging.file.as_deref().map(Self::expand_path)
    }

    /// Per-tool deadline, if configured
    pub fn timeout(&self) -> Option<Duration> {
        match self.execution.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
