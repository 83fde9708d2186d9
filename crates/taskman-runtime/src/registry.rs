//! Tracking diagnostics sink
//!
//! [`TaskRegistry`] keeps every live item under a lock so `sync_all()` can
//! block until the scheduler drains. A leaked item is never destroyed, so it
//! stays in the wait set and `sync_all()` runs into its timeout.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{error, warn};

use taskman_core::diagnostics::{DiagnosticSink, SyncOutcome, TaskDump};
use taskman_core::id::TaskId;

/// Cap on retained dumps
const MAX_DUMPS: usize = 256;

#[derive(Default)]
struct RegistryInner {
    /// Items not yet destroyed, leaked ones included
    live: BTreeMap<TaskId, String>,
    /// Subset of `live` whose finalize failed
    leaked: Vec<(TaskId, String)>,
    dumps: Vec<TaskDump>,
    dropped_dumps: usize,
}

/// Registry of live items, the tracking [`DiagnosticSink`]
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
    drained: Condvar,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            drained: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Items reported as leaked
    pub fn leaked(&self) -> Vec<(TaskId, String)> {
        self.lock().leaked.clone()
    }

    /// Recorded dumps, oldest first
    pub fn dumps(&self) -> Vec<TaskDump> {
        self.lock().dumps.clone()
    }

    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    fn render_outstanding(inner: &RegistryInner) -> String {
        let mut out = String::new();
        for (id, description) in &inner.live {
            if inner.leaked.iter().any(|(leaked, _)| leaked == id) {
                let _ = writeln!(out, "  {} {} (leaked)", id, description);
            } else {
                let _ = writeln!(out, "  {} {}", id, description);
            }
        }
        out
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticSink for TaskRegistry {
    fn is_tracking(&self) -> bool {
        true
    }

    fn task_submitted(&self, id: TaskId, description: &str) {
        let mut inner = self.lock();
        if let Some(previous) = inner.live.insert(id, description.to_owned()) {
            error!(target: "taskman::bug", %id, %previous, "handle registered twice");
        }
    }

    fn task_destroyed(&self, id: TaskId) {
        let mut inner = self.lock();
        if inner.live.remove(&id).is_none() {
            error!(target: "taskman::bug", %id, "destroyed item was not registered");
        }
        if inner.live.is_empty() {
            self.drained.notify_all();
        }
    }

    fn task_leaked(&self, id: TaskId, description: &str) {
        let mut inner = self.lock();
        if !inner.live.contains_key(&id) {
            error!(target: "taskman::bug", %id, "leaked item was not registered");
        }
        inner.leaked.push((id, description.to_owned()));
    }

    fn task_dump(&self, dump: TaskDump) {
        let mut inner = self.lock();
        if inner.dumps.len() >= MAX_DUMPS {
            inner.dumps.remove(0);
            inner.dropped_dumps += 1;
        }
        inner.dumps.push(dump);
    }

    fn wait_drained(&self, timeout: Duration) -> SyncOutcome {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if inner.live.is_empty() {
                return SyncOutcome::Drained;
            }
            let now = Instant::now();
            if now >= deadline {
                let outstanding = inner.live.len();
                warn!(
                    outstanding,
                    leaked = inner.leaked.len(),
                    dropped_dumps = inner.dropped_dumps,
                    "sync timed out, outstanding items:\n{}",
                    Self::render_outstanding(&inner)
                );
                return SyncOutcome::TimedOut { outstanding };
            }
            inner = self
                .drained
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    fn outstanding(&self) -> Vec<(TaskId, String)> {
        self.lock()
            .live
            .iter()
            .map(|(id, d)| (*id, d.clone()))
            .collect()
    }
}
