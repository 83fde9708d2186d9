//! Idle worker parking
//!
//! Pool workers park here when the job queue is empty; `submit` wakes one.
//! A wake issued while nobody is parked is remembered, so a worker that
//! checked the queue just before the push does not sleep through it.

use std::time::Duration;

/// Platform-specific parking primitive
pub trait WorkerParking: Send + Sync {
    /// Park the calling worker until woken or `timeout` passes.
    ///
    /// Returns `true` when a wake was consumed. Callers re-check for work
    /// either way.
    fn park(&self, timeout: Option<Duration>) -> bool;

    /// Wake one parked worker, or leave a pending wake for the next one
    fn wake_one(&self);

    /// Wake every parked worker (shutdown)
    fn wake_all(&self);

    /// Number of parked workers (hint, may be stale)
    fn parked_count(&self) -> usize;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

/// Create the platform-appropriate parking instance
pub fn new_parking() -> Box<dyn WorkerParking> {
    Box::new(PlatformParking::new())
}
