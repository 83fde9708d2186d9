//! Dispatcher-owned task arena
//!
//! Records are indexed by the slot of their [`TaskId`]. A slot remembers
//! the generation of its last occupant after the record is destroyed, so a
//! stale handle resolves to [`Lookup::Destroyed`] instead of aliasing a
//! newer item.

use std::time::Instant;

use taskman_core::diagnostics::DumpReason;
use taskman_core::id::TaskId;
use taskman_core::log::TaskLog;
use taskman_core::state::{TaskFlags, TaskState};
use taskman_core::work::{Outcome, Work};

/// Scheduler-side state of one work item
pub struct TaskRecord {
    pub id: TaskId,
    pub description: String,
    pub state: TaskState,
    pub flags: TaskFlags,
    pub ready_at: Option<Instant>,
    pub submitted_at: Instant,
    /// Notified in order when this item finalizes
    pub dependents: Vec<(TaskId, u64)>,
    /// Predecessors not yet finalized
    pub pending: u32,
    /// Next link of the slave chain
    pub next_slave: Option<TaskId>,
    /// Chain head, for slaves
    pub master: Option<TaskId>,
    /// A re-check message is already in the work queue
    pub queued: bool,
    pub log: TaskLog,
    /// Payload. `None` while a worker holds it.
    pub work: Option<Box<dyn Work>>,
    pub dump_reasons: Vec<DumpReason>,
    pub outcome: Option<Outcome>,
    pub finalized: bool,
}

impl TaskRecord {
    pub fn new(id: TaskId, description: String, work: Box<dyn Work>, flags: TaskFlags) -> Self {
        Self {
            id,
            description,
            state: TaskState::Flushed,
            flags,
            ready_at: None,
            submitted_at: Instant::now(),
            dependents: Vec::new(),
            pending: 0,
            next_slave: None,
            master: None,
            queued: false,
            log: TaskLog::new(),
            work: Some(work),
            dump_reasons: Vec::new(),
            outcome: None,
            finalized: false,
        }
    }

    /// Flag for a dump, recording why
    pub fn mark_dump(&mut self, reason: DumpReason) {
        self.flags.insert(TaskFlags::DUMP);
        self.dump_reasons.push(reason);
    }

    /// Move to `next`, refusing backwards or out-of-table transitions
    pub fn transition(&mut self, next: TaskState) -> Result<(), (TaskState, TaskState)> {
        if self.state.can_transition_to(next) {
            self.state = next;
            Ok(())
        } else {
            Err((self.state, next))
        }
    }

    pub fn is_slave(&self) -> bool {
        self.flags.contains(TaskFlags::SLAVE)
    }
}

/// What a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// A record is installed under this handle
    Live,
    /// The item was destroyed (or its slot reused since)
    Destroyed,
    /// The handle was never installed
    Unknown,
}

struct Slot {
    generation: u32,
    /// Ever occupied
    used: bool,
    record: Option<TaskRecord>,
}

pub struct TaskArena {
    slots: Vec<Slot>,
    live: usize,
}

impl TaskArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
        }
    }

    /// Install a record under its handle.
    ///
    /// Returns the record back if the slot is still occupied.
    pub fn insert(&mut self, record: TaskRecord) -> Result<(), TaskRecord> {
        let index = record.id.as_usize();
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || Slot {
                generation: 0,
                used: false,
                record: None,
            });
        }
        let slot = &mut self.slots[index];
        if slot.record.is_some() {
            return Err(record);
        }
        slot.generation = record.id.generation();
        slot.used = true;
        slot.record = Some(record);
        self.live += 1;
        Ok(())
    }

    pub fn lookup(&self, id: TaskId) -> Lookup {
        let slot = match self.slots.get(id.as_usize()) {
            Some(slot) if id.is_some() && slot.used => slot,
            _ => return Lookup::Unknown,
        };
        if slot.generation == id.generation() {
            if slot.record.is_some() {
                Lookup::Live
            } else {
                Lookup::Destroyed
            }
        } else if slot.generation > id.generation() {
            Lookup::Destroyed
        } else {
            Lookup::Unknown
        }
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskRecord> {
        self.slots
            .get(id.as_usize())
            .and_then(|s| s.record.as_ref())
            .filter(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskRecord> {
        self.slots
            .get_mut(id.as_usize())
            .and_then(|s| s.record.as_mut())
            .filter(|r| r.id == id)
    }

    /// Destroy a record, keeping the slot's generation
    pub fn remove(&mut self, id: TaskId) -> Option<TaskRecord> {
        let slot = self.slots.get_mut(id.as_usize())?;
        if slot.generation != id.generation() {
            return None;
        }
        let record = slot.record.take();
        if record.is_some() {
            self.live -= 1;
        }
        record
    }

    /// Installed records
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Installed records in slot order
    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.slots.iter().filter_map(|s| s.record.as_ref())
    }
}

impl Default for TaskArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskman_core::work::FnWork;

    fn record(index: u32, generation: u32) -> TaskRecord {
        TaskRecord::new(
            TaskId::new(index, generation),
            format!("r{}", index),
            Box::new(FnWork::new("r", |_: &mut TaskLog| Ok(()))),
            TaskFlags::empty(),
        )
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut arena = TaskArena::new();
        arena.insert(record(3, 0)).ok().unwrap();
        assert_eq!(arena.live(), 1);
        assert_eq!(arena.lookup(TaskId::new(3, 0)), Lookup::Live);
        assert_eq!(arena.lookup(TaskId::new(0, 0)), Lookup::Unknown);
        assert_eq!(arena.lookup(TaskId::new(9, 0)), Lookup::Unknown);
        assert_eq!(arena.lookup(TaskId::NONE), Lookup::Unknown);
        assert_eq!(arena.get(TaskId::new(3, 0)).unwrap().description, "r3");
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut arena = TaskArena::new();
        arena.insert(record(1, 0)).ok().unwrap();
        assert!(arena.remove(TaskId::new(1, 0)).is_some());
        assert_eq!(arena.lookup(TaskId::new(1, 0)), Lookup::Destroyed);

        arena.insert(record(1, 1)).ok().unwrap();
        assert_eq!(arena.lookup(TaskId::new(1, 0)), Lookup::Destroyed);
        assert_eq!(arena.lookup(TaskId::new(1, 1)), Lookup::Live);
        assert_eq!(arena.lookup(TaskId::new(1, 2)), Lookup::Unknown);
        assert!(arena.get(TaskId::new(1, 0)).is_none());
        assert!(arena.remove(TaskId::new(1, 0)).is_none());
        assert_eq!(arena.live(), 1);
    }

    #[test]
    fn test_occupied_slot_rejected() {
        let mut arena = TaskArena::new();
        arena.insert(record(0, 0)).ok().unwrap();
        assert!(arena.insert(record(0, 1)).is_err());
    }

    #[test]
    fn test_transition_guard() {
        let mut r = record(0, 0);
        assert!(r.transition(TaskState::Ready).is_ok());
        assert_eq!(r.transition(TaskState::Flushed), Err((TaskState::Ready, TaskState::Flushed)));
        assert!(r.transition(TaskState::Done).is_ok());
        assert!(r.transition(TaskState::Invalid).is_ok());
        assert!(r.transition(TaskState::Dead).is_err());
    }
}
