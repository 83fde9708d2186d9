//! # taskman-core
//!
//! Core types and traits for the taskman task-graph scheduler.
//!
//! This crate is platform-agnostic and spawns no threads.
//! The dispatcher, worker pool and queues live in `taskman-runtime`.
//!
//! ## Modules
//!
//! - `id` - generational work item handle
//! - `state` - work item state machine states and flag bits
//! - `work` - collaborator trait implemented by payloads
//! - `task` - producer-side builder
//! - `log` - per-item append-only diagnostic log
//! - `slot` - handle allocator shared by producers and the dispatcher
//! - `diagnostics` - pluggable diagnostic sink capability
//! - `error` - error types
//! - `env` - environment variable helpers

pub mod id;
pub mod state;
pub mod work;
pub mod task;
pub mod log;
pub mod slot;
pub mod diagnostics;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use id::TaskId;
pub use state::{TaskFlags, TaskState};
pub use work::{FnWork, Outcome, Work};
pub use task::{Dependency, Task, TaskParts};
pub use log::{LogLine, TaskLog};
pub use slot::HandleAllocator;
pub use diagnostics::{DiagnosticSink, DumpReason, NoopDiagnostics, SyncOutcome, TaskDump};
pub use error::{PushError, SchedError, SchedResult, TaskError};
pub use env::{env_get, env_get_bool, env_get_micros, env_get_millis};

/// Default limits
pub mod constants {
    /// Worker threads in the pool
    pub const DEFAULT_NUM_WORKERS: usize = 4;

    /// Upper bound on pool size
    pub const MAX_WORKERS: usize = 64;

    /// Live handles before `push` is rejected
    pub const DEFAULT_MAX_TASKS: usize = 65536;

    /// `sync_all()` wait bound
    pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 10_000;

    /// `setup()` time budget before a warning
    pub const DEFAULT_SETUP_BUDGET_US: u64 = 3_000;

    /// `finalize()` time budget before a warning
    pub const DEFAULT_FINALIZE_BUDGET_US: u64 = 5_000;

    /// Idle worker park timeout
    pub const DEFAULT_PARK_TIMEOUT_US: u64 = 10_000;
}
