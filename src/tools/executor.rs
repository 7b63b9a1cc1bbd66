//! Parallel executor with bounded concurrency
//!
//! Runs one task per tool, at most `max_workers` at a time:
//! - Semaphore-bounded worker pool (queued tasks wait for a permit)
//! - Results returned in input order, whatever the completion order
//! - Optional per-task deadline and batch-wide cancellation, both of which
//!   kill the child's whole process group
//! - One tool's failure never touches its siblings

use crate::errors::ScanError;
use crate::status::{OperationResult, OperationState, StatusStore};
use crate::telemetry::{TelemetryCollector, TelemetryEvent};
use crate::tools::command::{log_file_path, render, shell_command};
use crate::tools::process::{cancelled, isolate_process_group, terminate, CancelHandle, ChildTracker};
use crate::tools::registry::dedupe_by_name;
use crate::tools::types::{ExecutionResult, ToolDefinition};
use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, info_span, warn, Instrument};

/// Default worker pool size
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Per-batch execution knobs
#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    /// Deadline for each child process; `None` waits forever
    pub timeout: Option<Duration>,
}

/// Parallel executor for tool runs
pub struct ParallelExecutor {
    /// Shared status store
    store: Arc<StatusStore>,

    /// Install root; each tool runs inside `<install_dir>/<name>`
    install_dir: PathBuf,

    /// Output root; logs land in `<output_dir>/<tool.output_dir>/`
    output_dir: PathBuf,

    options: ExecutorOptions,

    /// Live children, swept before `run_tools` returns
    tracker: ChildTracker,

    cancel: CancelHandle,

    telemetry: Option<TelemetryCollector>,
}

impl ParallelExecutor {
    /// Create new parallel executor
    pub fn new(
        store: Arc<StatusStore>,
        install_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            install_dir: install_dir.into(),
            output_dir: output_dir.into(),
            options: ExecutorOptions::default(),
            tracker: ChildTracker::new(),
            cancel: CancelHandle::new(),
            telemetry: None,
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Handle for cancelling runs from another task (e.g. a Ctrl-C listener)
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Side table of children currently running
    pub fn tracker(&self) -> &ChildTracker {
        &self.tracker
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn telemetry(&self) -> Option<&TelemetryCollector> {
        self.telemetry.as_ref()
    }

    /// Run every tool against `target` with at most `max_workers` in flight
    ///
    /// Returns exactly one result per distinct tool name, in input order
    /// (first occurrence wins). Position in the list says nothing about
    /// completion order.
    pub async fn run_tools(
        &self,
        tools: &[ToolDefinition],
        target: &str,
        max_workers: usize,
    ) -> Vec<ExecutionResult> {
        let tools = dedupe_by_name(tools);
        let workers = if max_workers == 0 {
            warn!("max_workers is 0; running with a single worker");
            1
        } else {
            max_workers
        };

        info!(
            tools = tools.len(),
            workers,
            target = %target,
            "starting batch"
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::with_capacity(tools.len());

        for tool in &tools {
            let task = ToolTask {
                cwd: self.install_dir.join(&tool.name),
                tool_output_dir: self.output_dir.join(&tool.output_dir),
                tool: tool.clone(),
                target: target.to_string(),
                store: self.store.clone(),
                tracker: self.tracker.clone(),
                cancel: self.cancel.subscribe(),
                timeout: self.options.timeout,
                telemetry: self.telemetry.clone(),
            };
            let span = info_span!("tool", tool = %tool.name);
            handles.push(tokio::spawn(task.run(semaphore.clone()).instrument(span)));
        }

        let joined = join_all(handles).await;

        let results = joined
            .into_iter()
            .zip(&tools)
            .map(|(joined, tool)| match joined {
                Ok(result) => result,
                Err(e) => {
                    let reason = if e.is_panic() {
                        format!("worker panicked: {}", panic_message(e.into_panic()))
                    } else {
                        format!("worker aborted: {}", e)
                    };
                    warn!(tool = %tool.name, %reason, "worker task did not return a result");
                    let result = ExecutionResult::engine_error(
                        tool.name.clone(),
                        tool.run_command_template.clone(),
                        reason,
                        None,
                        Duration::ZERO,
                    );
                    self.store.update(
                        &tool.name,
                        OperationState::ExecutionError,
                        &result.command,
                        Some(operation_result(&result)),
                    );
                    result
                }
            })
            .collect();

        for tool in self.tracker.terminate_all() {
            if let Some(telemetry) = &self.telemetry {
                telemetry.record(TelemetryEvent::ChildTerminated {
                    tool,
                    reason: "final sweep".to_string(),
                    timestamp: Instant::now(),
                });
            }
        }

        results
    }
}

/// Everything one worker needs, owned so the task can be spawned
struct ToolTask {
    tool: ToolDefinition,
    target: String,
    cwd: PathBuf,
    tool_output_dir: PathBuf,
    store: Arc<StatusStore>,
    tracker: ChildTracker,
    cancel: watch::Receiver<bool>,
    timeout: Option<Duration>,
    telemetry: Option<TelemetryCollector>,
}

impl ToolTask {
    async fn run(mut self, semaphore: Arc<Semaphore>) -> ExecutionResult {
        let started = Instant::now();

        let _permit = tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel) => {
                return self.finish_early(started, "cancelled before start".to_string());
            }
            permit = semaphore.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => return self.finish_early(started, e.to_string()),
            },
        };

        if *self.cancel.borrow() {
            return self.finish_early(started, "cancelled before start".to_string());
        }

        let name = self.tool.name.clone();
        let template = self.tool.run_command_template.clone();
        self.store
            .update(&name, OperationState::Initializing, &template, None);
        self.record(TelemetryEvent::ToolStarted {
            tool: name.clone(),
            timestamp: Instant::now(),
        });

        let command = match render(&template, &self.target) {
            Ok(command) => command,
            Err(e) => {
                let result = ExecutionResult::engine_error(
                    name,
                    template,
                    e.to_string(),
                    None,
                    started.elapsed(),
                );
                return self.finish(result);
            }
        };

        self.store
            .update(&name, OperationState::Running, &command, None);

        let log_path = log_file_path(&self.tool_output_dir, &self.target);
        let result = match self.spawn_and_wait(&command, &log_path).await {
            Ok(status) => ExecutionResult::exited(
                name,
                command,
                exit_code(status),
                log_path,
                started.elapsed(),
            ),
            Err(e) => ExecutionResult::engine_error(
                name,
                command,
                e.to_string(),
                Some(log_path),
                started.elapsed(),
            ),
        };

        self.finish(result)
    }

    async fn spawn_and_wait(&mut self, command: &str, log_path: &Path) -> Result<ExitStatus, ScanError> {
        tokio::fs::create_dir_all(&self.tool_output_dir)
            .await
            .map_err(|e| {
                ScanError::Execution(format!(
                    "cannot create output directory {}: {}",
                    self.tool_output_dir.display(),
                    e
                ))
            })?;

        let log = std::fs::File::create(log_path).map_err(|e| {
            ScanError::Execution(format!("cannot open log file {}: {}", log_path.display(), e))
        })?;
        let log_err = log.try_clone()?;

        let mut cmd = shell_command(command);
        cmd.current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        isolate_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            ScanError::Execution(format!(
                "failed to spawn '{}' in {}: {}",
                command,
                self.cwd.display(),
                e
            ))
        })?;

        let name = self.tool.name.clone();
        if let Some(pid) = child.id() {
            self.tracker.register(&name, pid);
        }
        debug!(command = %command, log = %log_path.display(), "child spawned");

        let outcome = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| ScanError::Execution(format!("failed waiting on child: {}", e)))
            }
            _ = deadline(self.timeout) => Err(ScanError::Timeout {
                after: self.timeout.unwrap_or_default(),
            }),
            _ = cancelled(&mut self.cancel) => Err(ScanError::Cancelled),
        };

        if let Err(reason @ (ScanError::Timeout { .. } | ScanError::Cancelled)) = &outcome {
            warn!(%reason, "terminating child process group");
            terminate(&mut child).await;
            self.record(TelemetryEvent::ChildTerminated {
                tool: name.clone(),
                reason: reason.to_string(),
                timestamp: Instant::now(),
            });
        }

        self.tracker.unregister(&name);
        outcome
    }

    /// Record the terminal state and emit completion telemetry
    fn finish(&self, result: ExecutionResult) -> ExecutionResult {
        match &result.error {
            Some(error) => warn!(exit_code = result.exit_code, %error, "tool finished with an engine error"),
            None => info!(exit_code = result.exit_code, status = %result.status, "tool finished"),
        }

        self.store.update(
            &result.tool,
            result.status,
            &result.command,
            Some(operation_result(&result)),
        );
        self.record(TelemetryEvent::ToolCompleted {
            tool: result.tool.clone(),
            status: result.status,
            exit_code: result.exit_code,
            duration_ms: result.duration_ms,
            timestamp: Instant::now(),
        });
        result
    }

    /// Result for a task that never got to run its command
    fn finish_early(&self, started: Instant, reason: String) -> ExecutionResult {
        let result = ExecutionResult::engine_error(
            self.tool.name.clone(),
            self.tool.run_command_template.clone(),
            reason,
            None,
            started.elapsed(),
        );
        self.finish(result)
    }

    fn record(&self, event: TelemetryEvent) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(event);
        }
    }
}

fn operation_result(result: &ExecutionResult) -> OperationResult {
    let mut payload = OperationResult::default().with_exit_code(result.exit_code);
    if let Some(log_path) = &result.log_path {
        payload = payload.with_log_path(log_path.display().to_string());
    }
    if let Some(error) = &result.error {
        payload = payload.with_error(error.clone());
    }
    payload
}

/// Exit code, or the negated signal number for a signalled child
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    crate::tools::types::ENGINE_FAILURE_EXIT_CODE
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending::<()>().await,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
