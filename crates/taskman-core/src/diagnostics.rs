//! Pluggable diagnostics capability
//!
//! The dispatcher reports item lifecycle events to a [`DiagnosticSink`]
//! chosen when the task manager is constructed. [`NoopDiagnostics`] ignores
//! everything; the runtime's tracking registry records live items so that
//! `sync_all()` can wait for them and leaks can be detected.

use std::fmt;
use std::time::Duration;

use crate::id::TaskId;

/// Why an item's state and log were dumped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpReason {
    SetupFailed,
    RunFailed,
    FinalizeFailed,
    /// A hook exceeded its configured time budget
    BudgetExceeded { hook: &'static str, took: Duration },
}

impl fmt::Display for DumpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpReason::SetupFailed => write!(f, "setup failed"),
            DumpReason::RunFailed => write!(f, "run failed"),
            DumpReason::FinalizeFailed => write!(f, "finalize failed"),
            DumpReason::BudgetExceeded { hook, took } => {
                write!(f, "{} took {}us", hook, took.as_micros())
            }
        }
    }
}

/// A rendered diagnostic dump of one item
#[derive(Debug, Clone)]
pub struct TaskDump {
    pub id: TaskId,
    pub description: String,
    pub reasons: Vec<DumpReason>,
    /// State, flags, links and log lines, one per line
    pub report: String,
}

/// Result of waiting for tracked items to drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every tracked item was destroyed
    Drained,
    /// The timeout passed with items still alive
    TimedOut { outstanding: usize },
    /// The sink does not track items
    Untracked,
}

/// Diagnostic capability. All hooks default to no-ops.
pub trait DiagnosticSink: Send + Sync {
    /// Whether this sink keeps a registry of live items
    fn is_tracking(&self) -> bool {
        false
    }

    /// An item (or slave) was accepted by `push`
    fn task_submitted(&self, _id: TaskId, _description: &str) {}

    /// An item reached `Dead` and was reclaimed
    fn task_destroyed(&self, _id: TaskId) {}

    /// An item became `Invalid` and will never be reclaimed. It stays
    /// alive for `wait_drained` and `outstanding`.
    fn task_leaked(&self, _id: TaskId, _description: &str) {}

    /// An item was dumped
    fn task_dump(&self, _dump: TaskDump) {}

    /// Wait until no tracked item is alive, or `timeout` passes
    fn wait_drained(&self, _timeout: Duration) -> SyncOutcome {
        SyncOutcome::Untracked
    }

    /// Tracked items still alive, with their descriptions
    fn outstanding(&self) -> Vec<(TaskId, String)> {
        Vec::new()
    }
}

/// Sink that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDiagnostics;

impl DiagnosticSink for NoopDiagnostics {}
