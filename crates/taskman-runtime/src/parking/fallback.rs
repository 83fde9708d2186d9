//! Condvar-based parking for platforms without futex

use super::WorkerParking;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub struct FallbackParking {
    /// Wake pending
    pending: Mutex<bool>,
    condvar: Condvar,
    parked: AtomicUsize,
}

impl FallbackParking {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }

    fn signal(&self, all: bool) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            *pending = true;
        }
        if all {
            self.condvar.notify_all();
        } else {
            self.condvar.notify_one();
        }
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FallbackParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        self.parked.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());

        if !*pending {
            pending = match timeout {
                Some(t) => {
                    self.condvar
                        .wait_timeout(pending, t)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => self.condvar.wait(pending).unwrap_or_else(|e| e.into_inner()),
            };
        }

        let woken = std::mem::replace(&mut *pending, false);
        self.parked.fetch_sub(1, Ordering::SeqCst);
        woken
    }

    fn wake_one(&self) {
        self.signal(false);
    }

    fn wake_all(&self) {
        self.signal(true);
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
