//! Deferred-readiness set
//!
//! Items whose `ready_at` is still in the future wait here instead of in
//! the work queue. Only the dispatcher thread touches the set, so there is
//! no lock.
//!
//! # Ordering
//!
//! Min-heap keyed by `(ready_at, seq)`. `seq` is a per-set counter bumped
//! on every insert, which makes ties deterministic.
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Pop due: O(k log n) where k = number of due items
//! - Next deadline: O(1)

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use taskman_core::id::TaskId;

#[derive(Debug, Clone, Copy)]
struct DeferredEntry {
    ready_at: Instant,
    seq: u64,
    id: TaskId,
}

impl PartialEq for DeferredEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for DeferredEntry {}

impl PartialOrd for DeferredEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeferredEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, earliest deadline must be on top
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Timestamp-ordered set of items waiting for their deadline
pub struct DeferredSet {
    heap: BinaryHeap<DeferredEntry>,
    next_seq: u64,
    total_inserted: u64,
    total_released: u64,
}

impl DeferredSet {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            next_seq: 0,
            total_inserted: 0,
            total_released: 0,
        }
    }

    /// Park `id` until `ready_at`
    pub fn insert(&mut self, id: TaskId, ready_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.total_inserted += 1;
        self.heap.push(DeferredEntry { ready_at, seq, id });
    }

    /// Remove every entry with `ready_at <= now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<TaskId> {
        let mut due = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.ready_at > now {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                due.push(entry.id);
            }
        }
        self.total_released += due.len() as u64;
        due
    }

    /// Earliest pending deadline
    #[inline]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.ready_at)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn stats(&self) -> DeferredStats {
        DeferredStats {
            pending: self.heap.len(),
            total_inserted: self.total_inserted,
            total_released: self.total_released,
        }
    }
}

impl Default for DeferredSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for DeferredSet
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredStats {
    /// Entries still waiting
    pub pending: usize,
    /// Total entries inserted (lifetime)
    pub total_inserted: u64,
    /// Total entries released by `pop_due` (lifetime)
    pub total_released: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(n: u32) -> TaskId {
        TaskId::new(n, 0)
    }

    #[test]
    fn test_pop_due_in_deadline_order() {
        let mut set = DeferredSet::new();
        let now = Instant::now();
        set.insert(id(3), now + Duration::from_millis(30));
        set.insert(id(1), now + Duration::from_millis(10));
        set.insert(id(2), now + Duration::from_millis(20));

        assert_eq!(set.next_deadline(), Some(now + Duration::from_millis(10)));
        assert_eq!(set.pop_due(now + Duration::from_millis(50)), vec![id(1), id(2), id(3)]);
        assert!(set.is_empty());
        assert!(set.next_deadline().is_none());
    }

    #[test]
    fn test_pop_due_leaves_future_entries() {
        let mut set = DeferredSet::new();
        let now = Instant::now();
        set.insert(id(1), now);
        set.insert(id(2), now + Duration::from_secs(5));

        assert_eq!(set.pop_due(now), vec![id(1)]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.next_deadline(), Some(now + Duration::from_secs(5)));
        assert!(set.pop_due(now + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_ties_break_by_insertion() {
        let mut set = DeferredSet::new();
        let at = Instant::now();
        for n in [5, 9, 1, 7] {
            set.insert(id(n), at);
        }
        assert_eq!(set.pop_due(at), vec![id(5), id(9), id(1), id(7)]);
    }

    #[test]
    fn test_stats() {
        let mut set = DeferredSet::new();
        let now = Instant::now();
        set.insert(id(1), now);
        set.insert(id(2), now + Duration::from_secs(60));
        set.pop_due(now);
        let stats = set.stats();
        assert_eq!(stats.total_inserted, 2);
        assert_eq!(stats.total_released, 1);
        assert_eq!(stats.pending, 1);
    }
}
