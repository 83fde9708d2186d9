//! Producer-side work item builder
//!
//! A [`Task`] is what a producer hands to the scheduler. It carries the
//! payload, an optional readiness deadline, the predecessors it waits for
//! and an optional slave chain. Once pushed, the scheduler owns it.

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::TaskError;
use crate::id::TaskId;
use crate::log::TaskLog;
use crate::state::TaskFlags;
use crate::work::{FnWork, Work};

/// Declared predecessor of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    /// Task that must finalize first
    pub on: TaskId,
    /// Opaque value passed back through `Work::notified`
    pub context: u64,
}

/// A work item before submission
pub struct Task {
    work: Box<dyn Work>,
    description: String,
    ready_at: Option<Instant>,
    after: Vec<Dependency>,
    flags: TaskFlags,
    slaves: Vec<Task>,
}

/// Decomposed task, consumed by the dispatcher when it installs the item
pub struct TaskParts {
    pub work: Box<dyn Work>,
    pub description: String,
    pub ready_at: Option<Instant>,
    pub after: Vec<Dependency>,
    pub flags: TaskFlags,
    pub slaves: Vec<TaskParts>,
}

impl Task {
    /// Wrap a payload
    pub fn new<W: Work>(work: W) -> Self {
        Self::boxed(Box::new(work))
    }

    /// Wrap an already boxed payload
    pub fn boxed(work: Box<dyn Work>) -> Self {
        let description = work.describe();
        Self {
            work,
            description,
            ready_at: None,
            after: Vec::new(),
            flags: TaskFlags::empty(),
            slaves: Vec::new(),
        }
    }

    /// Closure payload with default setup/finalize hooks
    pub fn from_fn<F>(description: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&mut TaskLog) -> Result<(), TaskError> + Send + 'static,
    {
        Self::new(FnWork::new(description, f))
    }

    /// Not eligible before `at`
    pub fn ready_at(mut self, at: Instant) -> Self {
        self.ready_at = Some(at);
        self
    }

    /// Not eligible before `delay` from now
    pub fn ready_in(self, delay: Duration) -> Self {
        self.ready_at(Instant::now() + delay)
    }

    /// Wait for `on` to finalize
    pub fn after(self, on: TaskId) -> Self {
        self.after_with(on, 0)
    }

    /// Wait for `on` to finalize, receiving `context` in `Work::notified`
    pub fn after_with(mut self, on: TaskId, context: u64) -> Self {
        if on.is_some() {
            self.after.push(Dependency { on, context });
        }
        self
    }

    /// Run the payload on the dispatcher thread, bypassing the pool
    pub fn inline(mut self) -> Self {
        self.flags.insert(TaskFlags::INLINE);
        self
    }

    /// Flush this item's log even when it succeeds
    pub fn logging(mut self) -> Self {
        self.flags.insert(TaskFlags::LOGGING);
        self
    }

    /// Chain `slave` behind this task. The chain runs as one unit and
    /// shares this task's fan-out. The master gates the chain: the slave's
    /// predecessors are merged into the master's and the later deadline wins.
    pub fn slave(mut self, mut slave: Task) -> Self {
        self.after.append(&mut slave.after);
        self.ready_at = match (self.ready_at, slave.ready_at.take()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let nested = std::mem::take(&mut slave.slaves);
        self.slaves.push(slave);
        self.slaves.extend(nested);
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.ready_at
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.after
    }

    pub fn flags(&self) -> TaskFlags {
        self.flags
    }

    /// Number of slaves chained behind this task
    pub fn slave_count(&self) -> usize {
        self.slaves.len()
    }

    pub fn into_parts(self) -> TaskParts {
        TaskParts {
            work: self.work,
            description: self.description,
            ready_at: self.ready_at,
            after: self.after,
            flags: self.flags,
            slaves: self.slaves.into_iter().map(Task::into_parts).collect(),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("description", &self.description)
            .field("ready_at", &self.ready_at)
            .field("after", &self.after)
            .field("flags", &self.flags)
            .field("slaves", &self.slaves.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Task {
        Task::from_fn(name, |_| Ok(()))
    }

    #[test]
    fn test_builder_fields() {
        let at = Instant::now() + Duration::from_millis(5);
        let t = noop("blit")
            .ready_at(at)
            .after_with(TaskId::new(1, 0), 9)
            .after(TaskId::NONE)
            .inline()
            .logging();
        assert_eq!(t.description(), "blit");
        assert_eq!(t.deadline(), Some(at));
        assert_eq!(t.dependencies(), &[Dependency { on: TaskId::new(1, 0), context: 9 }]);
        assert!(t.flags().contains(TaskFlags::INLINE | TaskFlags::LOGGING));
    }

    #[test]
    fn test_slave_chain_is_flattened() {
        let inner = noop("c");
        let mid = noop("b").slave(inner);
        let master = noop("a").slave(mid);
        assert_eq!(master.slave_count(), 2);
        let parts = master.into_parts();
        let names: Vec<_> = parts.slaves.iter().map(|s| s.description.clone()).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert!(parts.slaves.iter().all(|s| s.slaves.is_empty()));
    }

    #[test]
    fn test_slave_gates_merge_into_master() {
        let now = Instant::now();
        let slave = noop("s")
            .after(TaskId::new(4, 1))
            .ready_at(now + Duration::from_millis(20));
        let master = noop("m")
            .after(TaskId::new(3, 0))
            .ready_at(now + Duration::from_millis(10))
            .slave(slave);
        assert_eq!(master.dependencies().len(), 2);
        assert_eq!(master.deadline(), Some(now + Duration::from_millis(20)));
        let parts = master.into_parts();
        assert!(parts.slaves[0].after.is_empty());
        assert!(parts.slaves[0].ready_at.is_none());
    }
}
