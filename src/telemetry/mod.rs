//! Telemetry for batch runs
//!
//! Collects lifecycle events from the runtime and executor, keeps running
//! counters, and forwards each event to an optional listener (the CLI uses
//! one to drive its progress bar).

use crate::status::OperationState;
use crate::tools::PrepareAction;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Telemetry event types
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    BatchStarted {
        target: String,
        tool_count: usize,
        max_workers: usize,
        timestamp: Instant,
    },
    ToolPrepared {
        tool: String,
        action: PrepareAction,
        timestamp: Instant,
    },
    ToolStarted {
        tool: String,
        timestamp: Instant,
    },
    ToolCompleted {
        tool: String,
        status: OperationState,
        exit_code: i32,
        duration_ms: u64,
        timestamp: Instant,
    },
    ChildTerminated {
        tool: String,
        reason: String,
        timestamp: Instant,
    },
}

/// Telemetry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryStats {
    pub events: usize,
    pub batches: usize,
    pub tools_prepared: usize,
    pub tools_installed: usize,
    pub tools_started: usize,
    pub tools_succeeded: usize,
    pub tools_failed: usize,
    pub children_terminated: usize,
}

type Listener = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;

/// Telemetry collector
#[derive(Clone)]
pub struct TelemetryCollector {
    stats: Arc<Mutex<TelemetryStats>>,
    listener: Option<Listener>,
}

impl std::fmt::Debug for TelemetryCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryCollector")
            .field("stats", &self.get_stats())
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

impl TelemetryCollector {
    /// Create a new telemetry collector
    pub fn new() -> Self {
        Self {
            stats: Arc::new(Mutex::new(TelemetryStats::default())),
            listener: None,
        }
    }

    /// Forward every recorded event to `listener`
    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&TelemetryEvent) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Record an event
    pub fn record(&self, event: TelemetryEvent) {
        {
            let mut stats = lock(&self.stats);
            stats.events += 1;
            match &event {
                TelemetryEvent::BatchStarted { .. } => stats.batches += 1,
                TelemetryEvent::ToolPrepared { action, .. } => {
                    stats.tools_prepared += 1;
                    if *action == PrepareAction::Installed {
                        stats.tools_installed += 1;
                    }
                }
                TelemetryEvent::ToolStarted { .. } => stats.tools_started += 1,
                TelemetryEvent::ToolCompleted { status, .. } => {
                    if *status == OperationState::Completed {
                        stats.tools_succeeded += 1;
                    } else {
                        stats.tools_failed += 1;
                    }
                }
                TelemetryEvent::ChildTerminated { .. } => stats.children_terminated += 1,
            }
        }

        if let Some(listener) = &self.listener {
            listener(&event);
        }
    }

    /// Get current statistics
    pub fn get_stats(&self) -> TelemetryStats {
        lock(&self.stats).clone()
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        lock(&self.stats).events
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
