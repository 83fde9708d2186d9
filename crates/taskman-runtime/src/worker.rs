//! Fixed-size worker pool
//!
//! Spawns N OS threads at creation. The dispatcher submits jobs onto a
//! lock-free MPMC queue; idle workers park until woken. Each job is handed
//! to the pool's executor, which is responsible for reporting completion
//! (the task manager's executor pushes a completion message back onto the
//! dispatcher's work queue). Workers never touch scheduling state.
//!
//! No dynamic scaling.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use tracing::{debug, trace, warn};

use taskman_core::error::{SchedError, SchedResult};

use crate::parking::{new_parking, WorkerParking};

/// Executes one job on a worker thread
pub type Executor<J> = Arc<dyn Fn(J) + Send + Sync>;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Pool owning the current thread, 0 outside any pool
    static CURRENT_POOL: Cell<u64> = const { Cell::new(0) };
}

/// Whether the calling thread is a worker of the pool with id `pool_id`
pub fn is_worker_of(pool_id: u64) -> bool {
    CURRENT_POOL.with(|c| c.get() == pool_id)
}

/// Shared state between the dispatcher and workers
struct PoolInner<J> {
    id: u64,
    /// Dispatcher → workers
    jobs: SegQueue<J>,
    execute: Executor<J>,
    parking: Box<dyn WorkerParking>,
    park_timeout: Duration,
    /// Workers currently executing a job
    active: AtomicUsize,
    executed: AtomicU64,
    shutdown: AtomicBool,
}

/// Statistics returned by [`WorkerPool::shutdown`]
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    /// Jobs run to completion
    pub executed: u64,
    /// Jobs still queued at shutdown, dropped unexecuted
    pub abandoned: usize,
}

pub struct WorkerPool<J: Send + 'static> {
    inner: Arc<PoolInner<J>>,
    handles: Vec<JoinHandle<()>>,
    total: usize,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Spawn `n` workers named `{name_prefix}-{i}`.
    ///
    /// If any thread fails to spawn, the ones already started are joined
    /// and the error is returned.
    pub fn new<F>(
        n: usize,
        name_prefix: &str,
        park_timeout: Duration,
        execute: F,
    ) -> SchedResult<Self>
    where
        F: Fn(J) + Send + Sync + 'static,
    {
        let n = n.max(1);
        let inner = Arc::new(PoolInner {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            jobs: SegQueue::new(),
            execute: Arc::new(execute),
            parking: new_parking(),
            park_timeout,
            active: AtomicUsize::new(0),
            executed: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });

        let mut pool = WorkerPool {
            inner,
            handles: Vec::with_capacity(n),
            total: n,
        };

        for worker_id in 0..n {
            let inner = Arc::clone(&pool.inner);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", name_prefix, worker_id))
                .spawn(move || worker_loop(inner, worker_id));
            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(SchedError::SpawnFailed(e.to_string()));
                }
            }
        }

        debug!(workers = n, "worker pool started");
        Ok(pool)
    }

    /// Queue a job and wake one worker. Never blocks.
    ///
    /// After shutdown the job is handed back.
    pub fn submit(&self, job: J) -> Result<(), J> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(job);
        }
        self.inner.jobs.push(job);
        self.inner.parking.wake_one();
        Ok(())
    }

    /// Process-unique id, see [`is_worker_of`]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Workers currently executing a job
    pub fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    pub fn total_workers(&self) -> usize {
        self.total
    }

    /// Jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.inner.jobs.len()
    }

    /// Stop all workers and wait for them to exit.
    ///
    /// Running jobs finish; queued jobs are dropped and counted.
    pub fn shutdown(&mut self) -> PoolStats {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.parking.wake_all();

        for handle in self.handles.drain(..) {
            let name = handle.thread().name().map(str::to_owned);
            if handle.join().is_err() {
                warn!(thread = ?name, "worker thread panicked");
            }
        }

        let mut abandoned = 0;
        while self.inner.jobs.pop().is_some() {
            abandoned += 1;
        }
        if abandoned > 0 {
            warn!(abandoned, "worker pool shut down with queued jobs");
        }

        PoolStats {
            executed: self.inner.executed.load(Ordering::Relaxed),
            abandoned,
        }
    }
}

impl<J: Send + 'static> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.shutdown();
        }
    }
}

/// Worker thread main loop
fn worker_loop<J>(inner: Arc<PoolInner<J>>, worker_id: usize) {
    CURRENT_POOL.with(|c| c.set(inner.id));
    trace!(worker_id, "worker running");
    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        match inner.jobs.pop() {
            Some(job) => {
                inner.active.fetch_add(1, Ordering::Relaxed);
                (inner.execute)(job);
                inner.active.fetch_sub(1, Ordering::Relaxed);
                inner.executed.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                inner.parking.park(Some(inner.park_timeout));
            }
        }
    }
    trace!(worker_id, "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_jobs_execute() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut pool = WorkerPool::new(3, "test-worker", Duration::from_millis(5), move |n: u32| {
            sink.lock().unwrap().push(n);
        })
        .unwrap();

        assert_eq!(pool.total_workers(), 3);
        for n in 0..100 {
            pool.submit(n).unwrap();
        }
        assert!(wait_for(|| seen.lock().unwrap().len() == 100));

        let stats = pool.shutdown();
        assert_eq!(stats.executed, 100);
        assert_eq!(stats.abandoned, 0);

        let mut got = seen.lock().unwrap().clone();
        got.sort_unstable();
        assert_eq!(got, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let mut pool = WorkerPool::new(1, "test-worker", Duration::from_millis(5), |_: u32| {}).unwrap();
        pool.shutdown();
        assert_eq!(pool.submit(7), Err(7));
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn test_workers_are_named() {
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&names);
        let mut pool = WorkerPool::new(1, "named-worker", Duration::from_millis(5), move |_: ()| {
            let name = thread::current().name().map(str::to_owned);
            sink.lock().unwrap().push(name);
        })
        .unwrap();
        pool.submit(()).unwrap();
        assert!(wait_for(|| !names.lock().unwrap().is_empty()));
        pool.shutdown();
        assert_eq!(names.lock().unwrap()[0].as_deref(), Some("named-worker-0"));
    }

    #[test]
    fn test_active_workers_tracks_running_jobs() {
        let gate = Arc::new(AtomicBool::new(false));
        let g = Arc::clone(&gate);
        let mut pool = WorkerPool::new(2, "test-worker", Duration::from_millis(5), move |_: ()| {
            while !g.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();

        pool.submit(()).unwrap();
        pool.submit(()).unwrap();
        assert!(wait_for(|| pool.active_workers() == 2));
        gate.store(true, Ordering::Release);
        assert!(wait_for(|| pool.active_workers() == 0));
        pool.shutdown();
    }

    #[test]
    fn test_worker_threads_know_their_pool() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut pool = WorkerPool::new(1, "test-worker", Duration::from_millis(5), move |other: u64| {
            sink.lock().unwrap().push(is_worker_of(other));
        })
        .unwrap();
        let id = pool.id();
        assert!(!is_worker_of(id));

        pool.submit(id).unwrap();
        pool.submit(id + 1000).unwrap();
        assert!(wait_for(|| seen.lock().unwrap().len() == 2));
        pool.shutdown();
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }
}
