//! Blocking FIFO between producers and the dispatcher
//!
//! Any thread may push; only the dispatcher pulls. A pull can carry an
//! absolute deadline so the dispatcher wakes in time for the next deferred
//! item. `wake()` enqueues an empty entry: the sentinel the dispatcher reads
//! as "check the stop flag", never as work.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

/// Thread-safe FIFO with deadline-based pull and a wake sentinel
pub struct WorkQueue<T> {
    entries: Mutex<VecDeque<Option<T>>>,
    cond: Condvar,
    /// Real items queued (sentinels excluded)
    len: AtomicUsize,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            cond: Condvar::new(),
            len: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Option<T>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an item. Never waits for a consumer.
    pub fn push(&self, item: T) {
        {
            let mut q = self.lock();
            q.push_back(Some(item));
            self.len.fetch_add(1, Ordering::Release);
        }
        self.cond.notify_one();
    }

    /// Append the wake sentinel
    pub fn wake(&self) {
        {
            let mut q = self.lock();
            q.push_back(None);
        }
        self.cond.notify_one();
    }

    /// Block until an entry arrives. `None` is the sentinel.
    pub fn pull(&self) -> Option<T> {
        let mut q = self.lock();
        loop {
            if let Some(entry) = q.pop_front() {
                return self.take(entry);
            }
            q = self.cond.wait(q).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Block until an entry arrives or `deadline` passes.
    ///
    /// Returns `None` on timeout or sentinel. A `None` deadline waits
    /// indefinitely, like [`pull`](Self::pull).
    pub fn pull_until(&self, deadline: Option<Instant>) -> Option<T> {
        let deadline = match deadline {
            Some(d) => d,
            None => return self.pull(),
        };

        let mut q = self.lock();
        loop {
            if let Some(entry) = q.pop_front() {
                return self.take(entry);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _timeout) = self
                .cond
                .wait_timeout(q, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            q = guard;
        }
    }

    /// Take every queued item without blocking, discarding sentinels
    pub fn drain(&self) -> Vec<T> {
        let mut q = self.lock();
        let items: Vec<T> = q.drain(..).flatten().collect();
        self.len.fetch_sub(items.len(), Ordering::Release);
        items
    }

    #[inline]
    fn take(&self, entry: Option<T>) -> Option<T> {
        if entry.is_some() {
            self.len.fetch_sub(1, Ordering::Release);
        }
        entry
    }

    /// Real items queued
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
