//! Handle allocator for work item arena slots
//!
//! Producers allocate a [`TaskId`] at push time so they can reference the
//! item as a predecessor before the dispatcher installs it. Released slots
//! are reused LIFO with their generation bumped, so handles to a destroyed
//! item never alias its successor.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::error::{SchedError, SchedResult};
use crate::id::TaskId;

/// Thread-safe generational handle allocator
pub struct HandleAllocator {
    /// LIFO stack of released slots, already carrying their next generation
    free_stack: Mutex<Vec<TaskId>>,

    /// Next never-used slot index
    next_fresh: AtomicU32,

    /// Maximum number of live handles
    max_slots: u32,

    /// Number of currently live handles
    allocated_count: AtomicU32,
}

impl HandleAllocator {
    pub fn new(max_slots: usize) -> Self {
        let max_slots = max_slots.min(u32::MAX as usize - 1) as u32;
        Self {
            free_stack: Mutex::new(Vec::new()),
            next_fresh: AtomicU32::new(0),
            max_slots,
            allocated_count: AtomicU32::new(0),
        }
    }

    /// Allocate a handle, preferring recently released slots
    pub fn allocate(&self) -> SchedResult<TaskId> {
        {
            let mut free = self.free_stack.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(id) = free.pop() {
                self.allocated_count.fetch_add(1, Ordering::Relaxed);
                return Ok(id);
            }
        }

        loop {
            let current = self.next_fresh.load(Ordering::Acquire);
            if current >= self.max_slots {
                return Err(SchedError::NoSlotsAvailable);
            }
            if self
                .next_fresh
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.allocated_count.fetch_add(1, Ordering::Relaxed);
                return Ok(TaskId::new(current, 0));
            }
        }
    }

    /// Allocate `n` handles or none at all
    pub fn allocate_many(&self, n: usize) -> SchedResult<Vec<TaskId>> {
        let mut ids = Vec::with_capacity(n);
        for _ in 0..n {
            match self.allocate() {
                Ok(id) => ids.push(id),
                Err(e) => {
                    self.release_batch(&ids);
                    return Err(e);
                }
            }
        }
        Ok(ids)
    }

    /// Return a handle's slot. The next occupant gets a newer generation.
    pub fn release(&self, id: TaskId) {
        if id.is_none() {
            return;
        }
        let mut free = self.free_stack.lock().unwrap_or_else(|e| e.into_inner());
        free.push(TaskId::new(id.index(), id.generation().wrapping_add(1)));
        self.allocated_count.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn release_batch(&self, ids: &[TaskId]) {
        if ids.is_empty() {
            return;
        }
        let mut free = self.free_stack.lock().unwrap_or_else(|e| e.into_inner());
        let mut released = 0;
        for id in ids.iter().filter(|id| id.is_some()) {
            free.push(TaskId::new(id.index(), id.generation().wrapping_add(1)));
            released += 1;
        }
        self.allocated_count.fetch_sub(released, Ordering::Relaxed);
    }

    /// Number of live handles (includes leaked items)
    #[inline]
    pub fn allocated_count(&self) -> u32 {
        self.allocated_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn max_slots(&self) -> u32 {
        self.max_slots
    }

    /// Highest slot index ever handed out, plus one
    #[inline]
    pub fn high_water(&self) -> u32 {
        self.next_fresh.load(Ordering::Acquire)
    }
}
