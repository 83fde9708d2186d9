//! Linux futex-based worker parking
//!
//! Futex word: 0 = no wake pending, 1 = wake pending.
//!
//! Park: bump the parked count, consume a pending wake if there is one,
//! otherwise FUTEX_WAIT while the word is 0.
//! Wake: set the word to 1, then FUTEX_WAKE if anyone is parked.
//! Both sides use SeqCst so either the parker sees the word or the waker
//! sees the parked count.

use super::WorkerParking;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

pub struct FutexParking {
    futex: AtomicU32,
    parked: AtomicUsize,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            futex: AtomicU32::new(0),
            parked: AtomicUsize::new(0),
        }
    }

    fn futex_wake(&self, count: i32) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                count,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FutexParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        self.parked.fetch_add(1, Ordering::SeqCst);

        if self.futex.swap(0, Ordering::SeqCst) != 0 {
            self.parked.fetch_sub(1, Ordering::SeqCst);
            return true;
        }

        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // Relative timeout; returns immediately with EAGAIN if the word is no longer 0
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                0u32,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            );
        }

        self.parked.fetch_sub(1, Ordering::SeqCst);
        self.futex.swap(0, Ordering::SeqCst) != 0
    }

    fn wake_one(&self) {
        self.futex.store(1, Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) > 0 {
            self.futex_wake(1);
        }
    }

    fn wake_all(&self) {
        self.futex.store(1, Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) > 0 {
            self.futex_wake(i32::MAX);
        }
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
