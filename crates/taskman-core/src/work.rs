//! Collaborator interface for work item payloads
//!
//! A producer wraps its payload in a type implementing [`Work`]. The
//! dispatcher calls `setup`, `check_emit` and `finalize` on its own thread;
//! `run` executes on a pool worker unless the item is flagged inline.
//! Hooks never see scheduling state, they only report success or failure.

use crate::error::TaskError;
use crate::id::TaskId;
use crate::log::TaskLog;

/// How a payload ended, handed to `finalize`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Payload ran to completion
    Completed,
    /// `setup` failed, the payload never ran
    SetupFailed(TaskError),
    /// The payload ran and reported an error
    Failed(TaskError),
}

impl Outcome {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed)
    }
}

/// Opaque unit of work driven by the dispatcher
pub trait Work: Send + 'static {
    /// Human-readable description for diagnostics
    fn describe(&self) -> String {
        String::from("task")
    }

    /// Prepare the payload. Runs once, on the dispatcher thread.
    fn setup(&mut self, _log: &mut TaskLog) -> Result<(), TaskError> {
        Ok(())
    }

    /// Extra emission gate evaluated after all predecessors finalized.
    /// Returning false holds the item in `Ready` until it is notified again
    /// or explicitly woken.
    fn check_emit(&mut self, _log: &mut TaskLog) -> bool {
        true
    }

    /// Execute the payload
    fn run(&mut self, log: &mut TaskLog) -> Result<(), TaskError>;

    /// Release payload resources. Runs exactly once, on the dispatcher thread.
    fn finalize(&mut self, _outcome: &Outcome, _log: &mut TaskLog) -> Result<(), TaskError> {
        Ok(())
    }

    /// A predecessor finalized. `context` is the value given when the
    /// dependency was declared.
    fn notified(&mut self, _from: TaskId, _context: u64) {}
}

/// Closure-backed payload
pub struct FnWork<F> {
    description: String,
    f: F,
}

impl<F> FnWork<F>
where
    F: FnMut(&mut TaskLog) -> Result<(), TaskError> + Send + 'static,
{
    pub fn new(description: impl Into<String>, f: F) -> Self {
        Self {
            description: description.into(),
            f,
        }
    }
}

impl<F> Work for FnWork<F>
where
    F: FnMut(&mut TaskLog) -> Result<(), TaskError> + Send + 'static,
{
    fn describe(&self) -> String {
        self.description.clone()
    }

    fn run(&mut self, log: &mut TaskLog) -> Result<(), TaskError> {
        (self.f)(log)
    }
}
