//! Tool registry loaded from a directory of definition files
//!
//! One tool per `.yaml`, `.yml` or `.json` file. A bad file is skipped
//! with a warning so the rest of the directory still loads.
//!
//! Example definition:
//!
//! ```yaml
//! name: subfinder
//! description: Passive subdomain enumeration
//! install:
//!   - go install github.com/projectdiscovery/subfinder/v2/cmd/subfinder@latest
//! run_command: subfinder -d {target} -silent
//! output_dir: subdomains
//! ```

use crate::errors::{Result, ScanError};
use crate::tools::command;
use crate::tools::types::ToolDefinition;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Extensions recognised as tool definition files
const DEFINITION_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Loosely-typed file contents before validation
#[derive(Debug, Deserialize)]
struct RawToolDefinition {
    name: Option<String>,
    #[serde(default, alias = "install_steps")]
    install: Vec<String>,
    #[serde(alias = "run_command_template")]
    run_command: Option<String>,
    output_dir: Option<String>,
    description: Option<String>,
}

/// Read-only mapping of tool name to definition
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

/// Registry plus the diagnostics collected while building it
#[derive(Debug, Clone, Default)]
pub struct RegistryLoad {
    pub registry: ToolRegistry,
    pub warnings: Vec<String>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from definitions already in memory
    ///
    /// Later duplicates are rejected with `InvalidDefinition`.
    pub fn from_definitions<I>(definitions: I) -> Result<Self>
    where
        I: IntoIterator<Item = ToolDefinition>,
    {
        let mut registry = Self::new();
        for tool in definitions {
            registry.register(tool, Path::new("<memory>"))?;
        }
        Ok(registry)
    }

    /// Load every definition file in `dir`
    ///
    /// Never fails as a whole: unreadable directories and malformed files
    /// become warnings on the returned `RegistryLoad`.
    pub fn load(dir: impl AsRef<Path>) -> RegistryLoad {
        let dir = dir.as_ref();
        let mut load = RegistryLoad::default();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                let msg = format!("Cannot read tools directory {}: {}", dir.display(), e);
                warn!("{}", msg);
                load.warnings.push(msg);
                return load;
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_definition_file(path))
            .collect();
        files.sort();

        for path in files {
            let outcome = parse_definition_file(&path)
                .and_then(|tool| load.registry.register(tool, &path));
            match outcome {
                Ok(Some(note)) => {
                    warn!("{}", note);
                    load.warnings.push(note);
                }
                Ok(None) => {}
                Err(e) => {
                    let msg = format!("Skipping {}: {}", path.display(), e);
                    warn!("{}", msg);
                    load.warnings.push(msg);
                }
            }
        }

        debug!(
            tools = load.registry.len(),
            warnings = load.warnings.len(),
            "tool registry loaded"
        );
        load
    }

    /// Insert a validated definition; returns a non-fatal note, if any
    fn register(&mut self, tool: ToolDefinition, source: &Path) -> Result<Option<String>> {
        if self.tools.contains_key(&tool.name) {
            return Err(ScanError::InvalidDefinition {
                path: source.to_path_buf(),
                reason: format!("duplicate tool name '{}'", tool.name),
            });
        }
        validate_definition(&tool, source)?;

        let note = if command::validate(&tool.run_command_template)? {
            None
        } else {
            Some(format!(
                "Tool '{}' run_command has no {{target}} placeholder; it will run unchanged",
                tool.name
            ))
        };

        self.tools.insert(tool.name.clone(), tool);
        Ok(note)
    }

    /// Get tool definition by name
    pub fn get(&self, name: &str) -> Result<&ToolDefinition> {
        self.tools.get(name).ok_or_else(|| ScanError::ToolNotFound {
            name: name.to_string(),
        })
    }

    /// Resolve names to definitions, preserving first-seen order
    ///
    /// Duplicate names are dropped. The first unknown name fails the whole
    /// resolution before anything runs.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<ToolDefinition>> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            if seen.insert(name.to_string()) {
                resolved.push(self.get(name)?.clone());
            }
        }
        Ok(resolved)
    }

    /// Every definition, sorted by name
    pub fn resolve_all(&self) -> Vec<ToolDefinition> {
        self.tools().into_iter().cloned().collect()
    }

    /// Check if tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Sorted tool names
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions sorted by name
    pub fn tools(&self) -> Vec<&ToolDefinition> {
        let mut tools: Vec<&ToolDefinition> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Get total number of tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Keep the first definition for each name, in input order
///
/// One name maps to one status record, tracker entry and log file, so a
/// batch never runs two definitions under the same name.
pub fn dedupe_by_name(tools: &[ToolDefinition]) -> Vec<ToolDefinition> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(tools.len());
    for tool in tools {
        if seen.insert(tool.name.as_str()) {
            unique.push(tool.clone());
        } else {
            warn!(tool = %tool.name, "duplicate tool in batch; keeping the first definition");
        }
    }
    unique
}

fn is_definition_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| DEFINITION_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn parse_definition_file(path: &Path) -> Result<ToolDefinition> {
    let contents = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let raw: RawToolDefinition = if is_json {
        serde_json::from_str(&contents)?
    } else {
        serde_yaml::from_str(&contents)?
    };

    into_definition(raw, path)
}

fn into_definition(raw: RawToolDefinition, path: &Path) -> Result<ToolDefinition> {
    let invalid = |reason: &str| ScanError::InvalidDefinition {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| invalid("missing or empty 'name'"))?;
    let run_command_template = raw
        .run_command
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| invalid("missing 'run_command'"))?;
    let output_dir = raw.output_dir.unwrap_or_else(|| name.clone());

    Ok(ToolDefinition {
        name,
        install_steps: raw.install,
        run_command_template,
        output_dir,
        description: raw.description,
    })
}

/// Name and output dir must each be one plain path component so the
/// install and output trees stay partitioned per tool
fn validate_definition(tool: &ToolDefinition, source: &Path) -> Result<()> {
    for (field, value) in [("name", &tool.name), ("output_dir", &tool.output_dir)] {
        let mut components = Path::new(value).components();
        let single_normal = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if !single_normal || value.contains('/') || value.contains('\\') {
            return Err(ScanError::InvalidDefinition {
                path: source.to_path_buf(),
                reason: format!("'{}' must be a single relative path segment, got '{}'", field, value),
            });
        }
    }
    Ok(())
}
