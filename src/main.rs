//! scanforge - Main CLI Entry Point

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use scanforge::{
    cli::{Args, Commands, Config, Verbosity},
    display::{self, BatchProgress},
    logging::{self, LoggingSettings},
    status::{OperationStatus, StatusStore},
    telemetry::TelemetryCollector,
    tools::{ExecutorOptions, InstallationManager, ParallelExecutor, ToolRegistry, ToolRuntime},
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Install, prepare and run the selected tools; true when all succeeded
async fn run_scan(
    config: &Config,
    verbosity: Verbosity,
    target: &str,
    all: bool,
    names: &[String],
    json: bool,
) -> Result<bool> {
    let tools_dir = config.tools_dir();
    let load = ToolRegistry::load(&tools_dir);
    display::print_warnings(&load.warnings);
    let registry = load.registry;

    let tools = if all {
        registry.resolve_all()
    } else {
        registry.resolve(names)?
    };
    if tools.is_empty() {
        bail!("no tools registered in {}", tools_dir.display());
    }

    let progress = BatchProgress::new(verbosity.show_progress() && !json, verbosity.show_events());
    let listener = progress.clone();
    let telemetry = TelemetryCollector::new().with_listener(move |event| listener.handle(event));

    let store = Arc::new(StatusStore::new(config.status_file()));
    let installer = InstallationManager::new(config.install_dir())
        .with_update_command(config.execution.update_command.clone())
        .with_updates(config.execution.update_on_prepare);
    let executor = ParallelExecutor::new(store, config.install_dir(), config.output_dir())
        .with_options(ExecutorOptions {
            timeout: config.timeout(),
        })
        .with_telemetry(telemetry);
    let runtime = ToolRuntime::new(registry, installer, executor);

    let cancel = runtime.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling batch");
            cancel.cancel();
        }
    });

    let report = runtime
        .run_batch(&tools, target, config.execution.max_workers)
        .await;
    interrupt.abort();
    progress.finish();

    if let Err(e) = runtime.store().persist() {
        warn!(error = %e, "final status write failed");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        display::print_report(&report);
        println!(
            "{}",
            format!("Status written to {}", runtime.store().path().display()).dimmed()
        );
    }

    Ok(report.all_succeeded())
}

/// List registered tools
fn list_tools(config: &Config) {
    let load = ToolRegistry::load(config.tools_dir());
    display::print_warnings(&load.warnings);

    let installer = InstallationManager::new(config.install_dir());
    display::print_tool_list(&load.registry.tools(), &installer);
}

/// Show recorded statuses from the status file
fn show_status(config: &Config, tool: Option<&str>, json: bool) -> Result<()> {
    let path = config.status_file();
    let store = StatusStore::open(&path)
        .with_context(|| format!("failed to read status file {}", path.display()))?;

    let operations: Vec<OperationStatus> = match tool {
        Some(name) => match store.get(name) {
            Some(op) => vec![op],
            None => bail!("no status recorded for '{}' in {}", name, path.display()),
        },
        None => store.operations(),
    };

    if json {
        let by_name: BTreeMap<&str, &OperationStatus> = operations
            .iter()
            .map(|op| (op.tool_name.as_str(), op))
            .collect();
        println!("{}", serde_json::to_string_pretty(&by_name)?);
    } else {
        display::print_statuses(&operations);
        if tool.is_none() {
            display::print_summary(&store.summary());
        }
    }
    Ok(())
}

/// Display current configuration
fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.to_toml()?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Err(message) = args.validate() {
        eprintln!("{} {}", "error:".red().bold(), message);
        std::process::exit(2);
    }

    let mut config =
        Config::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;

    let verbosity = args.verbosity();
    let guard = logging::init(&LoggingSettings {
        level: verbosity.log_level(&config.logging.level).to_string(),
        file: config.log_file(),
    })?;
    info!(
        verbosity = verbosity.as_str(),
        log_file = ?guard.log_file_path(),
        "scanforge starting"
    );

    let succeeded = match &args.command {
        Commands::Run {
            target,
            all,
            json,
            tools,
            ..
        } => run_scan(&config, verbosity, target, *all, tools, *json).await?,
        Commands::List => {
            list_tools(&config);
            true
        }
        Commands::Status { tool, json } => {
            show_status(&config, tool.as_deref(), *json)?;
            true
        }
        Commands::Config => {
            show_config(&config)?;
            true
        }
    };

    drop(guard);
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
