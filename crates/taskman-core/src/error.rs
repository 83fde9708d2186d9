//! Error types for the taskman scheduler

use crate::task::Task;

/// Result type for scheduler lifecycle operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors raised by the scheduler's lifecycle surface
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedError {
    /// `initialise()` was called twice
    #[error("task manager already initialised")]
    AlreadyInitialized,

    /// Operation needs a running dispatcher
    #[error("task manager not initialised")]
    NotInitialized,

    /// Task manager disabled by configuration
    #[error("task manager disabled")]
    Inactive,

    /// Stop was requested, no new work accepted
    #[error("task manager shutting down")]
    ShuttingDown,

    /// Operation would deadlock the dispatcher thread
    #[error("operation not allowed on the dispatcher thread")]
    CalledFromDispatcher,

    /// Operation would deadlock the worker pool running the caller
    #[error("operation not allowed on a worker thread")]
    CalledFromWorker,

    /// Handle space exhausted
    #[error("no task slots available")]
    NoSlotsAvailable,

    /// Spawning the dispatcher or a worker thread failed
    #[error("failed to spawn thread: {0}")]
    SpawnFailed(String),

    /// Configuration rejected by `validate()`
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The dispatcher stopped answering requests
    #[error("dispatcher is gone")]
    DispatcherGone,

    /// The dispatcher thread panicked
    #[error("dispatcher thread panicked")]
    DispatcherPanicked,
}

/// Failures reported by a work item's collaborator hooks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// `setup()` could not prepare the payload
    #[error("setup failed: {0}")]
    Setup(String),

    /// The payload itself failed
    #[error("run failed: {0}")]
    Run(String),

    /// `finalize()` could not release the payload
    #[error("finalize failed: {0}")]
    Finalize(String),

    /// The eligibility gate reported an error
    #[error("eligibility check failed: {0}")]
    Gate(String),
}

impl TaskError {
    /// Build a setup failure from anything printable
    pub fn setup(msg: impl Into<String>) -> Self {
        TaskError::Setup(msg.into())
    }

    /// Build a run failure from anything printable
    pub fn run(msg: impl Into<String>) -> Self {
        TaskError::Run(msg.into())
    }

    /// Build a finalize failure from anything printable
    pub fn finalize(msg: impl Into<String>) -> Self {
        TaskError::Finalize(msg.into())
    }
}

/// A rejected submission. The task is handed back to the producer.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// Disabled by configuration or not initialised yet
    #[error("task manager inactive, task not accepted")]
    Inactive(Task),

    /// Stop was requested
    #[error("task manager shutting down, task not accepted")]
    ShuttingDown(Task),

    /// `max_tasks` handles are live
    #[error("no task slots available, task not accepted")]
    Exhausted(Task),
}

impl PushError {
    /// Take back ownership of the rejected task
    pub fn into_task(self) -> Task {
        match self {
            PushError::Inactive(t) | PushError::ShuttingDown(t) | PushError::Exhausted(t) => t,
        }
    }

    /// Lifecycle error equivalent of this rejection
    pub fn reason(&self) -> SchedError {
        match self {
            PushError::Inactive(_) => SchedError::Inactive,
            PushError::ShuttingDown(_) => SchedError::ShuttingDown,
            PushError::Exhausted(_) => SchedError::NoSlotsAvailable,
        }
    }
}
