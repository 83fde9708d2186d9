//! Scheduler counters
//!
//! Written by the dispatcher (and `push` for `submitted`), read from any
//! thread through [`ManagerStats::snapshot`]. Counters only grow; gauges are
//! sampled by the dispatcher once per loop iteration.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ManagerStats {
    pub submitted: AtomicU64,
    pub handled: AtomicU64,
    pub setup_failures: AtomicU64,
    pub run_failures: AtomicU64,
    pub finalize_failures: AtomicU64,
    pub finalized: AtomicU64,
    pub destroyed: AtomicU64,
    pub leaked: AtomicU64,
    pub deferred: AtomicU64,
    pub bugs: AtomicU64,
    pub budget_overruns: AtomicU64,
    pub emitted_pool: AtomicU64,
    pub emitted_inline: AtomicU64,

    // Gauges
    pub pool_active: AtomicU64,
    pub pool_queued: AtomicU64,
    pub deferred_pending: AtomicU64,
    pub handles_live: AtomicU64,
    pub handles_high_water: AtomicU64,
}

impl ManagerStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set(gauge: &AtomicU64, value: u64) {
        gauge.store(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            submitted: load(&self.submitted),
            handled: load(&self.handled),
            setup_failures: load(&self.setup_failures),
            run_failures: load(&self.run_failures),
            finalize_failures: load(&self.finalize_failures),
            finalized: load(&self.finalized),
            destroyed: load(&self.destroyed),
            leaked: load(&self.leaked),
            deferred: load(&self.deferred),
            bugs: load(&self.bugs),
            budget_overruns: load(&self.budget_overruns),
            emitted_pool: load(&self.emitted_pool),
            emitted_inline: load(&self.emitted_inline),
            pool_active: load(&self.pool_active),
            pool_queued: load(&self.pool_queued),
            deferred_pending: load(&self.deferred_pending),
            handles_live: load(&self.handles_live),
            handles_high_water: load(&self.handles_high_water),
        }
    }
}

/// Point-in-time copy of [`ManagerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Items (masters and slaves) accepted by `push`
    pub submitted: u64,
    /// Queue entries processed by the dispatcher
    pub handled: u64,
    pub setup_failures: u64,
    pub run_failures: u64,
    pub finalize_failures: u64,
    /// `finalize()` calls that succeeded
    pub finalized: u64,
    /// Items reclaimed after reaching `Dead`
    pub destroyed: u64,
    /// Items stuck in `Invalid`
    pub leaked: u64,
    /// Insertions into the deferred set
    pub deferred: u64,
    /// Internal invariant violations
    pub bugs: u64,
    pub budget_overruns: u64,
    pub emitted_pool: u64,
    pub emitted_inline: u64,
    /// Workers running a job
    pub pool_active: u64,
    /// Jobs waiting for a worker
    pub pool_queued: u64,
    /// Items waiting for their `ready_at`
    pub deferred_pending: u64,
    pub handles_live: u64,
    /// Most handles ever live at once
    pub handles_high_water: u64,
}

impl StatsSnapshot {
    /// Items submitted but neither destroyed nor leaked
    pub fn live(&self) -> u64 {
        self.submitted.saturating_sub(self.destroyed + self.leaked)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "submitted:         {}", self.submitted)?;
        writeln!(f, "handled:           {}", self.handled)?;
        writeln!(f, "emitted (pool):    {}", self.emitted_pool)?;
        writeln!(f, "emitted (inline):  {}", self.emitted_inline)?;
        writeln!(f, "deferred:          {}", self.deferred)?;
        writeln!(f, "finalized:         {}", self.finalized)?;
        writeln!(f, "destroyed:         {}", self.destroyed)?;
        writeln!(f, "leaked:            {}", self.leaked)?;
        writeln!(f, "setup failures:    {}", self.setup_failures)?;
        writeln!(f, "run failures:      {}", self.run_failures)?;
        writeln!(f, "finalize failures: {}", self.finalize_failures)?;
        writeln!(f, "budget overruns:   {}", self.budget_overruns)?;
        writeln!(f, "bugs:              {}", self.bugs)?;
        writeln!(f, "pool active:       {}", self.pool_active)?;
        writeln!(f, "pool queued:       {}", self.pool_queued)?;
        writeln!(f, "deferred pending:  {}", self.deferred_pending)?;
        write!(
            f,
            "handles:           {} (high water {})",
            self.handles_live, self.handles_high_water
        )
    }
}
