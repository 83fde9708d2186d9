//! Work item state and flag types

use core::fmt;

/// State of a work item
///
/// Transitions only move forward: `Flushed → Ready → Done → Dead`.
/// `Invalid` is a terminal sink that is never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TaskState {
    /// Submitted, setup not yet run
    Flushed = 0,

    /// Setup done and deadline passed, eligibility gate evaluated
    Ready = 1,

    /// Payload finished or setup failed, awaiting finalize
    Done = 2,

    /// Finalize succeeded, pending destruction
    Dead = 3,

    /// Finalize failed or an invariant was violated. Never reclaimed.
    Invalid = 4,
}

impl TaskState {
    /// Check if the item can no longer change state
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Dead | TaskState::Invalid)
    }

    /// Check whether `next` is a legal successor of this state
    pub const fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Flushed, TaskState::Ready)
                | (TaskState::Flushed, TaskState::Done)
                | (TaskState::Ready, TaskState::Done)
                | (TaskState::Done, TaskState::Dead)
                | (TaskState::Done, TaskState::Invalid)
        )
    }

    /// Short upper-case name used in dumps
    pub const fn name(&self) -> &'static str {
        match self {
            TaskState::Flushed => "FLUSHED",
            TaskState::Ready => "READY",
            TaskState::Done => "DONE",
            TaskState::Dead => "DEAD",
            TaskState::Invalid => "INVALID",
        }
    }
}

impl From<u8> for TaskState {
    fn from(v: u8) -> Self {
        match v {
            0 => TaskState::Flushed,
            1 => TaskState::Ready,
            2 => TaskState::Done,
            3 => TaskState::Dead,
            _ => TaskState::Invalid,
        }
    }
}

impl From<TaskState> for u8 {
    fn from(state: TaskState) -> u8 {
        state as u8
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// Per-item flag bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TaskFlags: u32 {
        /// Parked in the deferred-readiness set until `ready_at`
        const WAITING = 1 << 0;
        /// Dump the item's log and state when it is finalized
        const DUMP = 1 << 1;
        /// Run the payload on the dispatcher thread instead of the pool
        const INLINE = 1 << 2;
        /// Flush the item's log even when nothing failed
        const LOGGING = 1 << 3;
        /// Payload handed to the pool or running inline
        const EMITTED = 1 << 4;
        /// Member of another item's slave chain
        const SLAVE = 1 << 5;
    }
}

impl fmt::Display for TaskFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(TaskState::Flushed.can_transition_to(TaskState::Ready));
        assert!(TaskState::Flushed.can_transition_to(TaskState::Done));
        assert!(TaskState::Ready.can_transition_to(TaskState::Done));
        assert!(TaskState::Done.can_transition_to(TaskState::Dead));
        assert!(TaskState::Done.can_transition_to(TaskState::Invalid));
    }

    #[test]
    fn test_no_backward_or_terminal_exit() {
        assert!(!TaskState::Ready.can_transition_to(TaskState::Flushed));
        assert!(!TaskState::Done.can_transition_to(TaskState::Ready));
        assert!(!TaskState::Dead.can_transition_to(TaskState::Done));
        assert!(!TaskState::Invalid.can_transition_to(TaskState::Dead));
        assert!(!TaskState::Flushed.can_transition_to(TaskState::Dead));
    }

    #[test]
    fn test_state_u8_roundtrip() {
        for s in [
            TaskState::Flushed,
            TaskState::Ready,
            TaskState::Done,
            TaskState::Dead,
            TaskState::Invalid,
        ] {
            assert_eq!(TaskState::from(u8::from(s)), s);
        }
        assert_eq!(TaskState::from(200), TaskState::Invalid);
    }

    #[test]
    fn test_flags_display() {
        assert_eq!(TaskFlags::empty().to_string(), "-");
        let f = TaskFlags::WAITING | TaskFlags::DUMP;
        assert_eq!(f.to_string(), "WAITING|DUMP");
    }
}
