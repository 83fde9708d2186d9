//! # taskman - task-graph scheduler
//!
//! A single dispatcher thread drives every work item through a small state
//! machine, a fixed worker pool runs the payloads, and finalized items
//! notify the items that declared them as predecessors.
//!
//! ## Features
//!
//! - **Deferred readiness**: items tagged with `ready_at` wait in a min-heap
//!   and the dispatcher wakes exactly when the earliest one is due
//! - **Dependencies**: `after(id)` holds an item until `id` finalizes
//! - **Slave chains**: several payloads run back to back as one unit
//! - **Leak on failure**: a failing `finalize` parks the item in `Invalid`
//!   instead of corrupting scheduler state, and it is counted
//! - **Diagnostics**: per-item logs, dumps of failed items, `sync_all()`
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use taskman::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = TaskManager::new(ManagerConfig::from_env().diagnostics(true));
//!     manager.initialise()?;
//!
//!     let decode = manager.push(Task::from_fn("decode", |log| {
//!         log.push("decoded frame");
//!         Ok(())
//!     }))?;
//!
//!     manager.push(
//!         Task::from_fn("present", |_| Ok(()))
//!             .after(decode)
//!             .ready_in(Duration::from_millis(16)),
//!     )?;
//!
//!     manager.sync_all();
//!     println!("{}", manager.shutdown()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   producers ── push() ──▶ WorkQueue ──▶ Dispatcher ──▶ WorkerPool
//!                              ▲            │    ▲           │
//!                              │            ▼    │           │
//!                              │      DeferredSet            │
//!                              └──── Completed / Handle ◀────┘
//! ```
//!
//! Item states move forward only: `Flushed → Ready → Done → Dead`, with
//! `Invalid` as the sink for items whose finalize failed.

// Re-export core types
pub use taskman_core::{
    constants,
    tlog,
    Dependency,
    DiagnosticSink,
    DumpReason,
    FnWork,
    NoopDiagnostics,
    Outcome,
    PushError,
    SchedError,
    SchedResult,
    SyncOutcome,
    Task,
    TaskDump,
    TaskError,
    TaskFlags,
    TaskId,
    TaskLog,
    TaskState,
    Work,
};

// Re-export env utilities
pub use taskman_core::{env_get, env_get_bool, env_get_micros, env_get_millis};

// Re-export runtime types
pub use taskman_runtime::{
    render_tree,
    ManagerConfig,
    ShutdownReport,
    StatsSnapshot,
    TaskManager,
    TaskRegistry,
    TaskSnapshot,
};

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        ManagerConfig, Outcome, PushError, SchedError, SyncOutcome, Task, TaskError, TaskId,
        TaskLog, TaskManager, Work,
    };
}
