//! Installation manager
//!
//! A tool counts as installed when `<install_dir>/<name>` exists and is
//! non-empty. There is no other install state. A half-finished install
//! leaves a non-empty directory behind and is then treated as installed;
//! nothing is rolled back.
//!
//! Steps run in their own process group and are killed when the batch is
//! cancelled; tools not prepared by then are reported as cancelled.

use crate::errors::{Result, ScanError};
use crate::tools::command::shell_command;
use crate::tools::process::{cancelled, isolate_process_group, terminate, CancelHandle};
use crate::tools::types::{PrepareAction, ToolDefinition, UpdateOutcome};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncReadExt;
use tokio::process::ChildStderr;
use tracing::{error, info, info_span, warn, Instrument};

/// Default pull/sync command for tools checked out from git
pub const DEFAULT_UPDATE_COMMAND: &str = "git pull --ff-only";

/// Directory whose presence marks a version-controlled install
const VCS_MARKER: &str = ".git";

/// Installs and updates tools under a shared install root
#[derive(Debug, Clone)]
pub struct InstallationManager {
    install_dir: PathBuf,
    update_command: String,
    update_enabled: bool,
    cancel: CancelHandle,
}

/// How a finished install or update command exited
struct StepOutput {
    status: ExitStatus,
    stderr: String,
}

impl InstallationManager {
    /// Create a manager rooted at `install_dir`
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            update_command: DEFAULT_UPDATE_COMMAND.to_string(),
            update_enabled: true,
            cancel: CancelHandle::new(),
        }
    }

    /// Share a cancel flag; once set, running steps are killed and no
    /// further tool is prepared
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the pull/sync command run by `update`
    pub fn with_update_command(mut self, command: impl Into<String>) -> Self {
        self.update_command = command.into();
        self
    }

    /// When disabled, `prepare` leaves installed tools untouched
    pub fn with_updates(mut self, enabled: bool) -> Self {
        self.update_enabled = enabled;
        self
    }

    /// Shared install root
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Dedicated directory of one tool; also its working directory at run time
    pub fn install_path(&self, tool: &ToolDefinition) -> PathBuf {
        self.install_dir.join(&tool.name)
    }

    /// True iff the tool's install directory exists and has an entry
    pub fn is_installed(&self, tool: &ToolDefinition) -> bool {
        std::fs::read_dir(self.install_path(tool))
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// Run install steps in order inside the install root
    ///
    /// Stops at the first non-zero exit.
    pub async fn install(&self, tool: &ToolDefinition) -> Result<()> {
        let span = info_span!("install", tool = %tool.name);
        async {
            tokio::fs::create_dir_all(&self.install_dir).await?;

            for (index, step) in tool.install_steps.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    return Err(ScanError::Cancelled);
                }
                info!(step = index + 1, total = tool.install_steps.len(), command = %step, "running install step");

                let output = match self.run_step(step, &self.install_dir).await {
                    Ok(output) => output,
                    Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
                    Err(e) => {
                        return Err(ScanError::Installation {
                            tool: tool.name.clone(),
                            step: step.clone(),
                            exit_code: -1,
                            stderr: e.to_string(),
                        })
                    }
                };

                if !output.status.success() {
                    return Err(ScanError::Installation {
                        tool: tool.name.clone(),
                        step: step.clone(),
                        exit_code: output.status.code().unwrap_or(-1),
                        stderr: output.stderr,
                    });
                }
            }

            info!("installation finished");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Best-effort pull/sync for version-controlled installs
    ///
    /// Never fails: problems come back as `UpdateOutcome::Failed` and are
    /// logged here.
    pub async fn update(&self, tool: &ToolDefinition) -> UpdateOutcome {
        let path = self.install_path(tool);
        if !path.join(VCS_MARKER).exists() {
            return UpdateOutcome::Skipped;
        }

        let outcome = match self.run_step(&self.update_command, &path).await {
            Ok(output) if output.status.success() => UpdateOutcome::Updated,
            Ok(output) => UpdateOutcome::Failed(format!(
                "'{}' exited with code {}: {}",
                self.update_command,
                output.status.code().unwrap_or(-1),
                output.stderr
            )),
            Err(ScanError::Cancelled) => UpdateOutcome::Failed("cancelled".to_string()),
            Err(e) => UpdateOutcome::Failed(format!(
                "could not run '{}': {}",
                self.update_command, e
            )),
        };

        if let UpdateOutcome::Failed(reason) = &outcome {
            warn!(tool = %tool.name, %reason, "update failed; continuing with installed version");
        }
        outcome
    }

    /// Install if missing, otherwise update
    ///
    /// Call once per tool before its execution is scheduled.
    pub async fn prepare(&self, tool: &ToolDefinition) -> Result<PrepareAction> {
        if !self.is_installed(tool) {
            info!(tool = %tool.name, "installing");
            self.install(tool).await?;
            return Ok(PrepareAction::Installed);
        }

        if !self.update_enabled {
            return Ok(PrepareAction::Unchanged);
        }

        info!(tool = %tool.name, "updating");
        let outcome = self.update(tool).await;
        if self.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        Ok(PrepareAction::Updated(outcome))
    }

    /// Prepare tools one after another
    ///
    /// Returns the tools that are ready to run, in input order, and the
    /// failures for the ones that are not. After cancellation every
    /// remaining tool fails with `ScanError::Cancelled` without running
    /// anything.
    pub async fn prepare_all(
        &self,
        tools: &[ToolDefinition],
    ) -> (Vec<(ToolDefinition, PrepareAction)>, Vec<(String, ScanError)>) {
        let mut ready = Vec::with_capacity(tools.len());
        let mut failed = Vec::new();

        for tool in tools {
            if self.cancel.is_cancelled() {
                failed.push((tool.name.clone(), ScanError::Cancelled));
                continue;
            }

            match self.prepare(tool).await {
                Ok(action) => ready.push((tool.clone(), action)),
                Err(ScanError::Cancelled) => {
                    info!(tool = %tool.name, "preparation cancelled");
                    failed.push((tool.name.clone(), ScanError::Cancelled));
                }
                Err(e) => {
                    if e.is_tool_local() {
                        warn!(tool = %tool.name, error = %e, "preparation failed; tool will not run");
                    } else {
                        error!(tool = %tool.name, error = %e, "install root unusable; tool will not run");
                    }
                    failed.push((tool.name.clone(), e));
                }
            }
        }

        (ready, failed)
    }

    /// Run one shell command in `cwd`, killing its process group on cancel
    async fn run_step(&self, command: &str, cwd: &Path) -> Result<StepOutput> {
        let mut cmd = shell_command(command);
        cmd.current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        isolate_process_group(&mut cmd);

        let mut child = cmd.spawn()?;
        let stderr = child.stderr.take();
        let mut cancel = self.cancel.subscribe();

        let finished = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => None,
            finished = async { tokio::join!(child.wait(), read_stderr(stderr)) } => Some(finished),
        };

        match finished {
            Some((status, stderr)) => Ok(StepOutput {
                status: status?,
                stderr,
            }),
            None => {
                warn!(command = %command, "cancelled; killing step");
                terminate(&mut child).await;
                Err(ScanError::Cancelled)
            }
        }
    }
}

async fn read_stderr(stderr: Option<ChildStderr>) -> String {
    let mut buf = Vec::new();
    if let Some(mut stderr) = stderr {
        if let Err(e) = stderr.read_to_end(&mut buf).await {
            warn!(error = %e, "failed to read step stderr");
        }
    }
    String::from_utf8_lossy(&buf).trim().to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_manager() -> (InstallationManager, TempDir) {
        let temp = TempDir::new().unwrap();
        let manager = InstallationManager::new(temp.path().join("installs"));
        (manager, temp)
    }

    fn touch_tool(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, "./run.sh {target}").with_install_steps([
            format!("mkdir -p {}", name),
            format!("touch {}/run.sh", name),
        ])
    }

    #[test]
    fn test_not_installed_when_missing_or_empty() {
        let (manager, _temp) = setup_manager();
        let tool = touch_tool("alpha");
        assert!(!manager.is_installed(&tool));

        std::fs::create_dir_all(manager.install_path(&tool)).unwrap();
        assert!(!manager.is_installed(&tool));

        std::fs::write(manager.install_path(&tool).join("bin"), "").unwrap();
        assert!(manager.is_installed(&tool));
    }

    #[tokio::test]
    async fn test_install_runs_steps_in_install_root() {
        let (manager, _temp) = setup_manager();
        let tool = touch_tool("alpha");

        manager.install(&tool).await.unwrap();

        assert!(manager.install_path(&tool).join("run.sh").exists());
        assert!(manager.is_installed(&tool));
    }

    #[tokio::test]
    async fn test_install_stops_at_first_failure() {
        let (manager, _temp) = setup_manager();
        let tool = ToolDefinition::new("beta", "beta {target}").with_install_steps([
            "mkdir -p beta",
            "echo 'missing dependency' >&2; exit 3",
            "touch beta/never",
        ]);

        let err = manager.install(&tool).await.unwrap_err();
        match err {
            ScanError::Installation {
                tool,
                step,
                exit_code,
                stderr,
            } => {
                assert_eq!(tool, "beta");
                assert!(step.contains("exit 3"));
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "missing dependency");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!manager.install_path(&tool).join("never").exists());
    }

    #[tokio::test]
    async fn test_prepare_installs_then_updates() {
        let (manager, _temp) = setup_manager();
        let tool = touch_tool("gamma");

        let first = manager.prepare(&tool).await.unwrap();
        assert_eq!(first, PrepareAction::Installed);

        let second = manager.prepare(&tool).await.unwrap();
        assert_eq!(second, PrepareAction::Updated(UpdateOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_prepare_with_updates_disabled() {
        let (manager, _temp) = setup_manager();
        let manager = manager.with_updates(false);
        let tool = touch_tool("delta");

        manager.prepare(&tool).await.unwrap();
        assert_eq!(
            manager.prepare(&tool).await.unwrap(),
            PrepareAction::Unchanged
        );
    }

    #[tokio::test]
    async fn test_update_failure_is_swallowed() {
        let (manager, _temp) = setup_manager();
        let manager = manager.with_update_command("exit 7");
        let tool = touch_tool("epsilon");
        std::fs::create_dir_all(manager.install_path(&tool).join(".git")).unwrap();

        match manager.update(&tool).await {
            UpdateOutcome::Failed(reason) => assert!(reason.contains("7")),
            other => panic!("expected failure, got {:?}", other),
        }

        // Still prepares fine
        let action = manager.prepare(&tool).await.unwrap();
        assert!(matches!(action, PrepareAction::Updated(UpdateOutcome::Failed(_))));
    }

    #[tokio::test]
    async fn test_update_runs_in_tool_directory() {
        let (manager, _temp) = setup_manager();
        let manager = manager.with_update_command("touch updated");
        let tool = touch_tool("zeta");
        std::fs::create_dir_all(manager.install_path(&tool).join(".git")).unwrap();

        assert_eq!(manager.update(&tool).await, UpdateOutcome::Updated);
        assert!(manager.install_path(&tool).join("updated").exists());
    }

    #[tokio::test]
    async fn test_cancel_kills_running_step_and_skips_rest() {
        let (manager, temp) = setup_manager();
        let cancel = CancelHandle::new();
        let manager = manager.with_cancel(cancel.clone());
        let tools: Vec<_> = ["one", "two"]
            .iter()
            .map(|name| {
                ToolDefinition::new(*name, "true")
                    .with_install_steps([format!("sleep 5; mkdir -p {}", name)])
            })
            .collect();

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let start = std::time::Instant::now();
        let (ready, failed) = manager.prepare_all(&tools).await;

        assert!(start.elapsed() < std::time::Duration::from_secs(3));
        assert!(ready.is_empty());
        let names: Vec<&str> = failed.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
        assert!(failed.iter().all(|(_, e)| matches!(e, ScanError::Cancelled)));
        assert!(!temp.path().join("installs").join("one").exists());
    }

    #[tokio::test]
    async fn test_prepare_all_splits_ready_and_failed() {
        let (manager, _temp) = setup_manager();
        let good = touch_tool("good");
        let bad = ToolDefinition::new("bad", "bad {target}").with_install_steps(["false"]);

        let (ready, failed) = manager.prepare_all(&[bad, good]).await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0.name, "good");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "bad");
    }
}
