//! Tool runtime coordinator
//!
//! Top-level control flow of a scan: resolve names against the registry,
//! prepare each tool (install or update), run the ready ones through the
//! parallel executor, then read the summary back from the status store.

use crate::errors::Result;
use crate::status::{StatusStore, StatusSummary};
use crate::telemetry::TelemetryEvent;
use crate::tools::executor::ParallelExecutor;
use crate::tools::installer::InstallationManager;
use crate::tools::process::CancelHandle;
use crate::tools::registry::{dedupe_by_name, ToolRegistry};
use crate::tools::types::{ExecutionResult, ToolDefinition};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// A resolved tool left out of the batch: preparation failed or the batch
/// was cancelled first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTool {
    pub tool: String,
    pub reason: String,
}

/// Everything a caller needs after a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub target: String,
    /// One entry per prepared tool, in resolution order
    pub results: Vec<ExecutionResult>,
    pub skipped: Vec<SkippedTool>,
    pub summary: StatusSummary,
    pub elapsed_ms: u64,
}

impl BatchReport {
    /// True when every requested tool was prepared and exited 0
    pub fn all_succeeded(&self) -> bool {
        self.skipped.is_empty() && self.results.iter().all(ExecutionResult::is_success)
    }
}

/// Tool runtime coordinator
pub struct ToolRuntime {
    registry: ToolRegistry,
    installer: InstallationManager,
    executor: ParallelExecutor,
}

impl ToolRuntime {
    /// The installer shares the executor's cancel flag
    pub fn new(
        registry: ToolRegistry,
        installer: InstallationManager,
        executor: ParallelExecutor,
    ) -> Self {
        let installer = installer.with_cancel(executor.cancel_handle());
        Self {
            registry,
            installer,
            executor,
        }
    }

    /// Get tool registry
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn installer(&self) -> &InstallationManager {
        &self.installer
    }

    pub fn executor(&self) -> &ParallelExecutor {
        &self.executor
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        self.executor.store()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.executor.cancel_handle()
    }

    /// Resolve names and run them; unknown names fail before anything runs
    pub async fn run<S: AsRef<str>>(
        &self,
        names: &[S],
        target: &str,
        max_workers: usize,
    ) -> Result<BatchReport> {
        let tools = self.registry.resolve(names)?;
        Ok(self.run_batch(&tools, target, max_workers).await)
    }

    /// Prepare and run already-resolved tools
    ///
    /// Tools whose preparation fails, or that are still unprepared when the
    /// batch is cancelled, are reported under `skipped` and never reach the
    /// executor or the status store. Repeated names run once.
    pub async fn run_batch(
        &self,
        tools: &[ToolDefinition],
        target: &str,
        max_workers: usize,
    ) -> BatchReport {
        let started = Instant::now();
        let tools = dedupe_by_name(tools);
        self.record(TelemetryEvent::BatchStarted {
            target: target.to_string(),
            tool_count: tools.len(),
            max_workers,
            timestamp: started,
        });

        let (ready, failed) = self.installer.prepare_all(&tools).await;

        let mut runnable = Vec::with_capacity(ready.len());
        for (tool, action) in ready {
            self.record(TelemetryEvent::ToolPrepared {
                tool: tool.name.clone(),
                action,
                timestamp: Instant::now(),
            });
            runnable.push(tool);
        }

        let skipped: Vec<SkippedTool> = failed
            .into_iter()
            .map(|(tool, e)| SkippedTool {
                tool,
                reason: e.to_string(),
            })
            .collect();

        let results = self.executor.run_tools(&runnable, target, max_workers).await;
        let summary = self.store().summary();

        info!(
            total = summary.total,
            completed = summary.completed,
            failed = summary.failed,
            skipped = skipped.len(),
            "batch finished"
        );

        BatchReport {
            target: target.to_string(),
            results,
            skipped,
            summary,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn record(&self, event: TelemetryEvent) {
        if let Some(telemetry) = self.executor.telemetry() {
            telemetry.record(event);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::errors::ScanError;
    use crate::status::OperationState;
    use crate::telemetry::TelemetryCollector;
    use tempfile::TempDir;

    fn setup_runtime(tools: Vec<ToolDefinition>) -> (ToolRuntime, TelemetryCollector, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(StatusStore::new(temp.path().join("status.json")));
        let telemetry = TelemetryCollector::new();
        let installer = InstallationManager::new(temp.path().join("installs"));
        let executor = ParallelExecutor::new(
            store,
            temp.path().join("installs"),
            temp.path().join("outputs"),
        )
        .with_telemetry(telemetry.clone());
        let registry = ToolRegistry::from_definitions(tools).unwrap();
        (ToolRuntime::new(registry, installer, executor), telemetry, temp)
    }

    fn installable(name: &str, run: &str) -> ToolDefinition {
        ToolDefinition::new(name, run)
            .with_install_steps([format!("mkdir -p {0} && touch {0}/.installed", name)])
    }

    #[tokio::test]
    async fn test_run_installs_and_executes() {
        let (runtime, telemetry, _temp) = setup_runtime(vec![
            installable("A", "echo {target}"),
            installable("B", "exit 1"),
        ]);

        let report = runtime.run(&["A", "B"], "http://x", 2).await.unwrap();

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].exit_code, 0);
        assert_eq!(report.results[1].exit_code, 1);
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.completed, 1);
        assert_eq!(report.summary.failed, 1);
        assert!(!report.all_succeeded());

        let stats = telemetry.get_stats();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.tools_installed, 2);
        assert_eq!(stats.tools_succeeded, 1);
        assert_eq!(stats.tools_failed, 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_before_running() {
        let (runtime, telemetry, _temp) = setup_runtime(vec![installable("A", "true")]);

        let err = runtime.run(&["A", "nope"], "t", 1).await.unwrap_err();

        assert!(matches!(err, ScanError::ToolNotFound { ref name } if name == "nope"));
        assert!(runtime.store().is_empty());
        assert_eq!(telemetry.event_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_preparation_skips_remaining_tools() {
        let tools: Vec<_> = (0..4)
            .map(|i| {
                let name = format!("slow{}", i);
                ToolDefinition::new(name.clone(), "true").with_install_steps([format!(
                    "sleep 0.5; mkdir -p {0} && touch {0}/.installed",
                    name
                )])
            })
            .collect();
        let (runtime, _telemetry, temp) = setup_runtime(tools.clone());
        let handle = runtime.cancel_handle();

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            handle.cancel();
        });

        let start = Instant::now();
        let report = runtime.run_batch(&tools, "t", 2).await;

        assert!(start.elapsed() < std::time::Duration::from_millis(1500));
        assert!(report.results.is_empty());
        assert_eq!(report.skipped.len(), 4);
        assert!(report.skipped.iter().all(|s| s.reason == "cancelled"));
        assert!(runtime.store().is_empty());
        for tool in &tools {
            assert!(!temp.path().join("installs").join(&tool.name).exists());
        }
    }

    #[tokio::test]
    async fn test_duplicate_definitions_run_once() {
        let (runtime, telemetry, _temp) = setup_runtime(vec![]);
        let tools = vec![installable("dup", "exit 0"), installable("dup", "exit 3")];

        let report = runtime.run_batch(&tools, "t", 2).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].exit_code, 0);
        assert_eq!(report.summary.total, 1);
        assert_eq!(report.summary.completed, 1);
        assert_eq!(telemetry.get_stats().tools_installed, 1);
    }

    #[tokio::test]
    async fn test_failed_preparation_skips_tool() {
        let broken = ToolDefinition::new("broken", "true").with_install_steps(["exit 2"]);
        let (runtime, _telemetry, _temp) =
            setup_runtime(vec![broken, installable("ok", "true")]);

        let report = runtime.run(&["broken", "ok"], "t", 2).await.unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].tool, "ok");
        assert_eq!(report.results[0].status, OperationState::Completed);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].tool, "broken");
        assert!(runtime.store().get("broken").is_none());
        assert!(!report.all_succeeded());
    }
}
