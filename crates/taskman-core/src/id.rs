//! Work item handle type

use core::fmt;

/// Generational handle for a work item
///
/// `index` addresses a slot in the dispatcher's arena, `generation` tells
/// apart successive occupants of the same slot. A handle whose generation
/// does not match the slot's current occupant is stale.
/// The maximum index (u32::MAX) is reserved as a sentinel for "no task".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

impl TaskId {
    /// Sentinel value indicating no task
    pub const NONE: TaskId = TaskId {
        index: u32::MAX,
        generation: 0,
    };

    /// Create a handle from its raw parts
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        TaskId { index, generation }
    }

    /// Arena slot index
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot index as usize for indexing
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    /// Occupancy generation of the slot this handle was issued for
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Check if this is the NONE sentinel
    #[inline]
    pub const fn is_none(self) -> bool {
        self.index == u32::MAX
    }

    /// Check if this is a real handle
    #[inline]
    pub const fn is_some(self) -> bool {
        self.index != u32::MAX
    }

    /// Convert to Option
    #[inline]
    pub const fn to_option(self) -> Option<TaskId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "TaskId(NONE)")
        } else {
            write!(f, "TaskId({}v{})", self.index, self.generation)
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "#{}.{}", self.index, self.generation)
        }
    }
}

impl Default for TaskId {
    fn default() -> Self {
        TaskId::NONE
    }
}
