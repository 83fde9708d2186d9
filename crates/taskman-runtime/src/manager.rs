//! Task manager: the public entry point
//!
//! An explicit context object owning the dispatcher thread. Producers share
//! it by reference or `Arc` and feed it through [`TaskManager::push`].
//!
//! ```rust,ignore
//! let manager = TaskManager::new(ManagerConfig::from_env());
//! manager.initialise()?;
//! let id = manager.push(Task::from_fn("hello", |_| Ok(())))?;
//! manager.push(Task::from_fn("after hello", |_| Ok(())).after(id))?;
//! manager.shutdown()?;
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use taskman_core::diagnostics::{DiagnosticSink, NoopDiagnostics, SyncOutcome};
use taskman_core::error::{PushError, SchedError, SchedResult};
use taskman_core::id::TaskId;
use taskman_core::slot::HandleAllocator;
use taskman_core::task::Task;

use crate::config::ManagerConfig;
use crate::dispatcher::{Dispatch, Dispatcher, Job, Shared, ShutdownReport};
use crate::dump::{render_tree, TaskSnapshot};
use crate::queue::WorkQueue;
use crate::registry::TaskRegistry;
use crate::stats::{ManagerStats, StatsSnapshot};
use crate::worker::{self, WorkerPool};

/// How long `inspect()` waits for the dispatcher to answer
const INSPECT_TIMEOUT: Duration = Duration::from_secs(5);

const DISPATCHER_THREAD_NAME: &str = "taskman-dispatcher";
const WORKER_THREAD_PREFIX: &str = "taskman-worker";

pub struct TaskManager {
    config: ManagerConfig,
    shared: Shared,
    /// `initialise()` was called
    initialised: AtomicBool,
    /// Dispatcher running and accepting pushes
    active: AtomicBool,
    /// Producers between their stop check and their queue push
    pushers: AtomicUsize,
    dispatcher: Mutex<Option<JoinHandle<ShutdownReport>>>,
    dispatcher_id: OnceLock<ThreadId>,
    pool_id: OnceLock<u64>,
    /// Result of the first `shutdown()`, handed out again on later calls
    shutdown_result: Mutex<Option<SchedResult<ShutdownReport>>>,
}

impl TaskManager {
    /// Create a manager. Diagnostics track live items when
    /// `config.diagnostics` is set.
    pub fn new(config: ManagerConfig) -> Self {
        let diagnostics: Arc<dyn DiagnosticSink> = if config.diagnostics {
            Arc::new(TaskRegistry::new())
        } else {
            Arc::new(NoopDiagnostics)
        };
        Self::with_diagnostics(config, diagnostics)
    }

    /// Create a manager reporting to a caller-supplied sink
    pub fn with_diagnostics(config: ManagerConfig, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        let shared = Shared {
            queue: Arc::new(WorkQueue::new()),
            stop: Arc::new(AtomicBool::new(false)),
            handles: Arc::new(HandleAllocator::new(config.max_tasks)),
            diagnostics,
            stats: Arc::new(ManagerStats::new()),
        };
        Self {
            config,
            shared,
            initialised: AtomicBool::new(false),
            active: AtomicBool::new(false),
            pushers: AtomicUsize::new(0),
            dispatcher: Mutex::new(None),
            dispatcher_id: OnceLock::new(),
            pool_id: OnceLock::new(),
            shutdown_result: Mutex::new(None),
        }
    }

    /// Start the worker pool and the dispatcher thread.
    ///
    /// A disabled manager initialises successfully but stays inactive.
    pub fn initialise(&self) -> SchedResult<()> {
        if self.initialised.swap(true, Ordering::AcqRel) {
            return Err(SchedError::AlreadyInitialized);
        }
        if !self.config.enabled {
            info!("task manager disabled, pushes will be rejected");
            return Ok(());
        }
        if let Err(e) = self.config.validate() {
            self.initialised.store(false, Ordering::Release);
            return Err(e);
        }

        let queue = Arc::clone(&self.shared.queue);
        let pool = WorkerPool::new(
            self.config.num_workers,
            WORKER_THREAD_PREFIX,
            self.config.park_timeout,
            move |mut job: Job| {
                job.execute();
                queue.push(Dispatch::Completed(job));
            },
        )?;
        let _ = self.pool_id.set(pool.id());

        let dispatcher = Dispatcher::new(self.shared.clone(), &self.config, pool);
        let handle = thread::Builder::new()
            .name(DISPATCHER_THREAD_NAME.into())
            .spawn(move || dispatcher.run())
            .map_err(|e| SchedError::SpawnFailed(e.to_string()))?;

        let _ = self.dispatcher_id.set(handle.thread().id());
        *lock(&self.dispatcher) = Some(handle);
        self.active.store(true, Ordering::Release);

        info!(
            workers = self.config.num_workers,
            max_tasks = self.config.max_tasks,
            diagnostics = self.shared.diagnostics.is_tracking(),
            "task manager started"
        );
        Ok(())
    }

    /// Whether pushes are currently accepted
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The diagnostics sink chosen at construction
    pub fn diagnostics(&self) -> &Arc<dyn DiagnosticSink> {
        &self.shared.diagnostics
    }

    fn on_dispatcher_thread(&self) -> bool {
        self.dispatcher_id.get() == Some(&thread::current().id())
    }

    fn on_worker_thread(&self) -> bool {
        self.pool_id.get().is_some_and(|id| worker::is_worker_of(*id))
    }

    /// Submit a task. Ownership moves to the scheduler on success; on
    /// rejection the task is handed back inside the error.
    pub fn push(&self, task: Task) -> Result<TaskId, PushError> {
        self.pushers.fetch_add(1, Ordering::SeqCst);
        let result = self.push_inner(task);
        self.pushers.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn push_inner(&self, task: Task) -> Result<TaskId, PushError> {
        if self.shared.stop.load(Ordering::SeqCst) {
            return Err(PushError::ShuttingDown(task));
        }
        if !self.active.load(Ordering::Acquire) {
            return Err(PushError::Inactive(task));
        }

        let ids = match self.shared.handles.allocate_many(1 + task.slave_count()) {
            Ok(ids) => ids,
            Err(_) => {
                warn!(
                    live = self.shared.handles.allocated_count(),
                    max = self.shared.handles.max_slots(),
                    "task handles exhausted"
                );
                return Err(PushError::Exhausted(task));
            }
        };

        let parts = task.into_parts();
        if self.shared.diagnostics.is_tracking() {
            self.shared.diagnostics.task_submitted(ids[0], &parts.description);
            for (id, slave) in ids[1..].iter().zip(&parts.slaves) {
                self.shared.diagnostics.task_submitted(*id, &slave.description);
            }
        }
        self.shared
            .stats
            .submitted
            .fetch_add(ids.len() as u64, Ordering::Relaxed);

        let id = ids[0];
        self.shared.queue.push(Dispatch::Submit { ids, parts });
        Ok(id)
    }

    /// Ask the dispatcher to re-run the eligibility check of a held item
    pub fn wake_task(&self, id: TaskId) -> SchedResult<()> {
        self.ensure_running()?;
        self.shared.queue.push(Dispatch::Recheck(id));
        Ok(())
    }

    fn ensure_running(&self) -> SchedResult<()> {
        if self.shared.stop.load(Ordering::Acquire) {
            Err(SchedError::ShuttingDown)
        } else if !self.config.enabled {
            Err(SchedError::Inactive)
        } else if !self.active.load(Ordering::Acquire) {
            Err(SchedError::NotInitialized)
        } else {
            Ok(())
        }
    }

    /// Wait up to the configured sync timeout for every tracked item to be
    /// destroyed. Outstanding items are dumped on timeout.
    pub fn sync_all(&self) -> SyncOutcome {
        self.sync_all_timeout(self.config.sync_timeout)
    }

    /// [`sync_all`](Self::sync_all) with an explicit bound
    pub fn sync_all_timeout(&self, timeout: Duration) -> SyncOutcome {
        if !self.shared.diagnostics.is_tracking() {
            return SyncOutcome::Untracked;
        }
        let outcome = self.shared.diagnostics.wait_drained(timeout);
        if let SyncOutcome::TimedOut { outstanding } = outcome {
            match self.dump_tasks() {
                Ok(tree) => warn!(outstanding, "sync timed out\n{}", tree),
                Err(e) => debug!(error = %e, "no dispatcher dump after sync timeout"),
            }
        }
        outcome
    }

    /// Structured view of every live item, taken by the dispatcher
    pub fn inspect(&self) -> SchedResult<Vec<TaskSnapshot>> {
        if self.on_dispatcher_thread() {
            return Err(SchedError::CalledFromDispatcher);
        }
        // Holding the lock keeps shutdown from joining the dispatcher
        // before it answers.
        let guard = lock(&self.dispatcher);
        if guard.is_none() || self.shared.stop.load(Ordering::Acquire) {
            drop(guard);
            self.ensure_running()?;
            return Err(SchedError::NotInitialized);
        }

        let (reply, answer) = mpsc::channel();
        self.shared.queue.push(Dispatch::Inspect(reply));
        let result = answer
            .recv_timeout(INSPECT_TIMEOUT)
            .map_err(|_| SchedError::DispatcherGone);
        drop(guard);
        result
    }

    /// Text tree of outstanding items, their slaves and dependents
    pub fn dump_tasks(&self) -> SchedResult<String> {
        self.inspect().map(|snapshots| render_tree(&snapshots))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Stop accepting work, let the dispatcher drain its queue, join it and
    /// tear down the worker pool.
    ///
    /// Idempotent: later calls return the first call's result. Refused on
    /// the dispatcher thread and on this manager's worker threads, which
    /// the join would wait for.
    pub fn shutdown(&self) -> SchedResult<ShutdownReport> {
        if self.on_dispatcher_thread() {
            return Err(SchedError::CalledFromDispatcher);
        }
        if self.on_worker_thread() {
            return Err(SchedError::CalledFromWorker);
        }

        let mut result = lock(&self.shutdown_result);
        if let Some(previous) = result.as_ref() {
            return previous.clone();
        }

        self.active.store(false, Ordering::Release);
        self.shared.stop.store(true, Ordering::SeqCst);
        // A producer past its stop check finishes its push first
        while self.pushers.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
        self.shared.queue.wake();

        let handle = lock(&self.dispatcher).take();
        let outcome = match handle {
            Some(handle) => match handle.join() {
                Ok(report) => {
                    info!(%report, "task manager shut down");
                    Ok(report)
                }
                Err(_) => {
                    error!("dispatcher thread panicked");
                    Err(SchedError::DispatcherPanicked)
                }
            },
            None => Ok(ShutdownReport {
                stats: self.shared.stats.snapshot(),
                ..ShutdownReport::default()
            }),
        };

        *result = Some(outcome.clone());
        outcome
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        match self.shutdown() {
            Ok(_) => {}
            Err(SchedError::CalledFromDispatcher | SchedError::CalledFromWorker) => {
                // Dropped from inside a hook or payload: the dispatcher exits on its own
                self.shared.stop.store(true, Ordering::SeqCst);
                self.shared.queue.wake();
            }
            Err(e) => warn!(error = %e, "task manager shutdown failed during drop"),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
