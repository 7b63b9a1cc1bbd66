//! Child process helpers
//!
//! Spawned tools run in their own process group on Unix so a timeout or
//! cancellation can take down grandchildren too. Every live child is
//! recorded in a `ChildTracker` until it is reaped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Cloneable cancel flag shared by installs and tool runs
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Stop pending work from starting and kill in-flight children
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the cancel flag is set; never resolves if it cannot be
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Side table of in-flight children, keyed by tool name
#[derive(Debug, Clone, Default)]
pub struct ChildTracker {
    children: Arc<Mutex<HashMap<String, u32>>>,
}

impl ChildTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a spawned child's pid (also its process group id)
    pub fn register(&self, tool: &str, pid: u32) {
        self.lock().insert(tool.to_string(), pid);
    }

    /// Forget a child once it has been reaped
    pub fn unregister(&self, tool: &str) {
        self.lock().remove(tool);
    }

    /// Number of children not yet reaped
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Kill every tracked process group and clear the table
    ///
    /// Returns the tools whose children were signalled.
    pub fn terminate_all(&self) -> Vec<String> {
        let drained: Vec<(String, u32)> = self.lock().drain().collect();
        for (tool, pid) in &drained {
            warn!(tool = %tool, pid, "terminating orphaned child process group");
            kill_process_group(*pid);
        }
        drained.into_iter().map(|(tool, _)| tool).collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Put the child in a fresh process group led by itself
pub fn isolate_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    cmd.kill_on_drop(true);
}

/// Kill a child and everything in its process group, then reap it
pub async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        kill_process_group(pid);
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "child already exited before kill");
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    // SAFETY: killpg only sends a signal; an invalid or stale group id
    // makes it return ESRCH, which is ignored
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "killpg failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {
    // No process groups here; the direct child is killed through its handle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_register_and_unregister() {
        let tracker = ChildTracker::new();
        assert!(tracker.is_empty());

        tracker.register("nmap", 4242);
        tracker.register("ffuf", 4243);
        assert_eq!(tracker.len(), 2);

        tracker.unregister("nmap");
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_cancel_handle_clones_share_flag() {
        let handle = CancelHandle::new();
        let other = handle.clone();
        assert!(!handle.is_cancelled());

        other.cancel();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_for_late_subscribers() {
        let handle = CancelHandle::new();
        handle.cancel();

        let mut rx = handle.subscribe();
        tokio::time::timeout(std::time::Duration::from_secs(1), cancelled(&mut rx))
            .await
            .expect("already-cancelled flag should resolve immediately");
    }

    #[test]
    fn test_tracker_clones_share_state() {
        let tracker = ChildTracker::new();
        let clone = tracker.clone();
        clone.register("a", 1);
        assert_eq!(tracker.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_all_kills_tracked_children() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        isolate_process_group(&mut cmd);
        let mut child = cmd.spawn().unwrap();

        let tracker = ChildTracker::new();
        tracker.register("sleeper", child.id().unwrap());

        let killed = tracker.terminate_all();
        assert_eq!(killed, vec!["sleeper".to_string()]);
        assert!(tracker.is_empty());

        let status = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
            .await
            .expect("child should die promptly")
            .unwrap();
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_reaps_child() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 30 & sleep 30");
        isolate_process_group(&mut cmd);
        let mut child = cmd.spawn().unwrap();

        terminate(&mut child).await;
        assert!(child.try_wait().unwrap().is_some());
    }
}
