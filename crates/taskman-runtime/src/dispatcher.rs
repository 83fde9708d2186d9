//! Dispatcher loop
//!
//! The dispatcher is the only thread that changes item state. It owns the
//! task arena, the deferred-readiness set and the worker pool, and consumes
//! the work queue:
//!
//! ```text
//! loop:
//!     msg = queue.pull_until(deferred.next_deadline())
//!     msg present           -> dispatch(msg)
//!     empty and stopping    -> exit
//!     deferred.pop_due(now) -> Ready, eligibility check
//! ```
//!
//! Workers only run payloads; they report back with [`Dispatch::Completed`].
//! Predecessors that finalize re-queue dependents with [`Dispatch::Handle`].

use std::any::Any;
use std::fmt::{self, Write as _};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use taskman_core::diagnostics::{DiagnosticSink, DumpReason, TaskDump};
use taskman_core::error::TaskError;
use taskman_core::id::TaskId;
use taskman_core::log::TaskLog;
use taskman_core::slot::HandleAllocator;
use taskman_core::state::{TaskFlags, TaskState};
use taskman_core::task::{Dependency, TaskParts};
use taskman_core::work::{Outcome, Work};

use crate::arena::{Lookup, TaskArena, TaskRecord};
use crate::config::ManagerConfig;
use crate::deferred::{DeferredSet, DeferredStats};
use crate::dump::TaskSnapshot;
use crate::queue::WorkQueue;
use crate::stats::{ManagerStats, StatsSnapshot};
use crate::worker::{PoolStats, WorkerPool};

/// Messages consumed by the dispatcher
pub(crate) enum Dispatch {
    /// A pushed task. `ids[0]` is the master, the rest its slaves in order.
    Submit { ids: Vec<TaskId>, parts: TaskParts },
    /// Re-run the state machine step for an item whose predecessors finalized
    Handle(TaskId),
    /// A chain came back from the pool
    Completed(Job),
    /// Producer asked for the eligibility check to be re-run
    Recheck(TaskId),
    /// Snapshot every live item
    Inspect(Sender<Vec<TaskSnapshot>>),
}

/// One link of an emitted chain, detached from its record while it runs
pub(crate) struct JobUnit {
    id: TaskId,
    work: Box<dyn Work>,
    log: TaskLog,
    result: Option<Result<(), TaskError>>,
}

/// A master and its slaves, executed in order as one unit
pub(crate) struct Job {
    master: TaskId,
    units: Vec<JobUnit>,
}

impl Job {
    /// Run every link. A failing link aborts the rest of the chain.
    pub(crate) fn execute(&mut self) {
        let mut failed: Option<TaskId> = None;
        for unit in &mut self.units {
            if let Some(link) = failed {
                unit.result = Some(Err(TaskError::run(format!(
                    "chain aborted after {} failed",
                    link
                ))));
                continue;
            }
            let work = &mut unit.work;
            let log = &mut unit.log;
            let result = guarded(TaskError::Run, || work.run(log));
            if result.is_err() {
                failed = Some(unit.id);
            }
            unit.result = Some(result);
        }
    }
}

/// Handles shared between the task manager and its dispatcher
#[derive(Clone)]
pub(crate) struct Shared {
    pub queue: Arc<WorkQueue<Dispatch>>,
    pub stop: Arc<AtomicBool>,
    pub handles: Arc<HandleAllocator>,
    pub diagnostics: Arc<dyn DiagnosticSink>,
    pub stats: Arc<ManagerStats>,
}

/// What the dispatcher left behind when it stopped
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Items still waiting for their `ready_at`, never run
    pub deferred_abandoned: usize,
    pub deferred: DeferredStats,
    /// Jobs queued in the pool but never started
    pub jobs_abandoned: usize,
    /// Pool completions finalized after the loop exited
    pub completions_drained: usize,
    /// Queue messages discarded after the loop exited
    pub messages_dropped: usize,
    /// Records still in the arena, leaked items included
    pub live_tasks: usize,
    pub pool: PoolStats,
    pub stats: StatsSnapshot,
}

impl fmt::Display for ShutdownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "live={} leaked={} deferred_abandoned={} deferred_released={} jobs_abandoned={} \
             completions_drained={} messages_dropped={} pool_executed={}",
            self.live_tasks,
            self.stats.leaked,
            self.deferred_abandoned,
            self.deferred.total_released,
            self.jobs_abandoned,
            self.completions_drained,
            self.messages_dropped,
            self.pool.executed,
        )
    }
}

pub(crate) struct Dispatcher {
    shared: Shared,
    pool: WorkerPool<Job>,
    arena: TaskArena,
    deferred: DeferredSet,
    setup_budget: Duration,
    finalize_budget: Duration,
    log_all: bool,
}

impl Dispatcher {
    pub(crate) fn new(shared: Shared, config: &ManagerConfig, pool: WorkerPool<Job>) -> Self {
        Self {
            shared,
            pool,
            arena: TaskArena::new(),
            deferred: DeferredSet::new(),
            setup_budget: config.setup_budget,
            finalize_budget: config.finalize_budget,
            log_all: config.log_all,
        }
    }

    /// Main loop. Returns once stop was requested and the queue ran dry.
    pub(crate) fn run(mut self) -> ShutdownReport {
        info!(workers = self.pool.total_workers(), "dispatcher started");

        loop {
            let stopping = self.shared.stop.load(Ordering::Acquire);
            // While stopping, never block: an empty queue means exit
            let deadline = if stopping {
                Some(Instant::now())
            } else {
                self.deferred.next_deadline()
            };

            match self.shared.queue.pull_until(deadline) {
                Some(msg) => self.dispatch(msg),
                None => {
                    if stopping && self.shared.queue.is_empty() {
                        break;
                    }
                }
            }

            self.promote_due();
            self.publish_gauges();
        }

        self.finish()
    }

    fn dispatch(&mut self, msg: Dispatch) {
        if !matches!(msg, Dispatch::Inspect(_)) {
            ManagerStats::bump(&self.shared.stats.handled);
        }
        match msg {
            Dispatch::Submit { ids, parts } => {
                if let Some(id) = self.install(ids, parts) {
                    self.handle(id);
                }
            }
            Dispatch::Handle(id) => {
                if let Some(rec) = self.arena.get_mut(id) {
                    rec.queued = false;
                }
                self.handle(id);
            }
            Dispatch::Completed(job) => self.complete(job),
            Dispatch::Recheck(id) => self.recheck(id),
            Dispatch::Inspect(reply) => {
                let _ = reply.send(self.snapshots());
            }
        }
    }

    fn publish_gauges(&self) {
        let stats = &self.shared.stats;
        ManagerStats::set(&stats.pool_active, self.pool.active_workers() as u64);
        ManagerStats::set(&stats.pool_queued, self.pool.queued() as u64);
        ManagerStats::set(&stats.deferred_pending, self.deferred.len() as u64);
        ManagerStats::set(&stats.handles_live, self.shared.handles.allocated_count() as u64);
        ManagerStats::set(&stats.handles_high_water, self.shared.handles.high_water() as u64);
    }

    fn bug(&self, id: TaskId, what: &str) {
        ManagerStats::bump(&self.shared.stats.bugs);
        error!(target: "taskman::bug", %id, "{}", what);
    }

    // ------------------------------------------------------------------
    // Installation
    // ------------------------------------------------------------------

    /// Create arena records for a pushed task and link its dependencies
    fn install(&mut self, ids: Vec<TaskId>, parts: TaskParts) -> Option<TaskId> {
        let master_id = match ids.first() {
            Some(id) => *id,
            None => {
                self.bug(TaskId::NONE, "submission without handles");
                return None;
            }
        };
        let TaskParts {
            work,
            description,
            ready_at,
            after,
            flags,
            slaves,
        } = parts;

        if slaves.len() + 1 != ids.len() {
            self.bug(master_id, "slave count does not match allocated handles");
        }

        let mut master = TaskRecord::new(
            master_id,
            description,
            work,
            flags & (TaskFlags::INLINE | TaskFlags::LOGGING),
        );
        master.ready_at = ready_at;
        master.next_slave = ids.get(1).copied();

        let mut chain = Vec::with_capacity(slaves.len());
        for (i, (slave_id, slave)) in ids[1..].iter().zip(slaves).enumerate() {
            let mut rec = TaskRecord::new(
                *slave_id,
                slave.description,
                slave.work,
                (slave.flags & TaskFlags::LOGGING) | TaskFlags::SLAVE,
            );
            rec.master = Some(master_id);
            rec.next_slave = ids.get(i + 2).copied();
            chain.push(rec);
        }

        for dep in after {
            self.link_dependency(&mut master, dep);
        }

        trace!(id = %master_id, slaves = chain.len(), pending = master.pending, "installed");
        for rec in std::iter::once(master).chain(chain) {
            if let Err(rec) = self.arena.insert(rec) {
                self.bug(rec.id, "arena slot still occupied");
            }
        }
        Some(master_id)
    }

    fn link_dependency(&mut self, waiter: &mut TaskRecord, dep: Dependency) {
        // Slaves share their master's fan-out
        let on = self
            .arena
            .get(dep.on)
            .and_then(|r| r.master)
            .unwrap_or(dep.on);

        match self.arena.lookup(on) {
            Lookup::Live => {
                if let Some(pred) = self.arena.get_mut(on) {
                    if pred.state == TaskState::Invalid {
                        warn!(
                            waiter = %waiter.id,
                            %on,
                            "predecessor is invalid, dependency will never be satisfied"
                        );
                    }
                    pred.dependents.push((waiter.id, dep.context));
                    waiter.pending += 1;
                }
            }
            Lookup::Destroyed => {
                trace!(waiter = %waiter.id, %on, "predecessor already finalized");
            }
            Lookup::Unknown => {
                self.bug(on, "dependency on a handle that was never submitted");
            }
        }
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    fn handle(&mut self, id: TaskId) {
        let (state, slave) = match self.arena.get(id) {
            Some(rec) => (rec.state, rec.is_slave()),
            None => {
                let what = match self.arena.lookup(id) {
                    Lookup::Destroyed => "stale handle reached the dispatcher",
                    _ => "unknown handle reached the dispatcher",
                };
                self.bug(id, what);
                return;
            }
        };
        if slave {
            self.bug(id, "slave queued on its own");
            return;
        }

        match state {
            TaskState::Flushed => self.handle_flushed(id),
            TaskState::Ready => self.check_emit(id),
            TaskState::Done => self.finalize(id),
            TaskState::Dead | TaskState::Invalid => {
                self.bug(id, "terminal item reached the dispatcher");
            }
        }
    }

    /// Master followed by its slaves
    fn chain_of(&self, master: TaskId) -> Vec<TaskId> {
        let mut chain = vec![master];
        let mut next = self.arena.get(master).and_then(|r| r.next_slave);
        while let Some(link) = next {
            chain.push(link);
            next = self.arena.get(link).and_then(|r| r.next_slave);
        }
        chain
    }

    fn set_state(&mut self, id: TaskId, next: TaskState) -> bool {
        match self.arena.get_mut(id).map(|r| r.transition(next)) {
            Some(Ok(())) => true,
            Some(Err((from, to))) => {
                self.bug(id, &format!("illegal transition {} -> {}", from, to));
                false
            }
            None => {
                self.bug(id, "transition on a missing record");
                false
            }
        }
    }

    fn handle_flushed(&mut self, id: TaskId) {
        let chain = self.chain_of(id);
        let mut failure = None;

        for &link in &chain {
            let Some(rec) = self.arena.get_mut(link) else {
                continue;
            };
            let Some(work) = rec.work.as_mut() else {
                continue;
            };
            let log = &mut rec.log;
            let start = Instant::now();
            let result = guarded(TaskError::Setup, || work.setup(log));
            note_budget(&self.shared.stats, rec, "setup", start.elapsed(), self.setup_budget);

            if let Err(err) = result {
                rec.mark_dump(DumpReason::SetupFailed);
                failure = Some((link, err));
                break;
            }
        }

        if let Some((link, err)) = failure {
            ManagerStats::bump(&self.shared.stats.setup_failures);
            warn!(%id, failed = %link, error = %err, "setup failed, finalizing without running");
            self.fail_chain(id, Outcome::SetupFailed(err), DumpReason::SetupFailed);
            return;
        }

        let ready_at = self.arena.get(id).and_then(|r| r.ready_at);
        match ready_at {
            Some(at) if at > Instant::now() => {
                if let Some(rec) = self.arena.get_mut(id) {
                    rec.flags.insert(TaskFlags::WAITING);
                }
                self.deferred.insert(id, at);
                ManagerStats::bump(&self.shared.stats.deferred);
                trace!(%id, "deferred");
            }
            _ => {
                if self.make_ready(id) {
                    self.check_emit(id);
                }
            }
        }
    }

    /// Move the whole chain to `Ready`
    fn make_ready(&mut self, id: TaskId) -> bool {
        self.chain_of(id)
            .into_iter()
            .fold(true, |ok, link| self.set_state(link, TaskState::Ready) && ok)
    }

    /// Drive a chain straight to `Done` with `outcome` and finalize it
    fn fail_chain(&mut self, id: TaskId, outcome: Outcome, reason: DumpReason) {
        for link in self.chain_of(id) {
            if let Some(rec) = self.arena.get_mut(link) {
                if link == id && !rec.dump_reasons.contains(&reason) {
                    rec.mark_dump(reason.clone());
                }
                rec.outcome = Some(outcome.clone());
            }
            self.set_state(link, TaskState::Done);
        }
        self.finalize(id);
    }

    fn promote_due(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        for id in self.deferred.pop_due(Instant::now()) {
            let waiting = match self.arena.get_mut(id) {
                Some(rec) => {
                    let waiting = rec.flags.contains(TaskFlags::WAITING);
                    rec.flags.remove(TaskFlags::WAITING);
                    waiting
                }
                None => false,
            };
            if !waiting {
                self.bug(id, "deferred entry without a waiting item");
                continue;
            }
            trace!(%id, "deadline reached");
            if self.make_ready(id) {
                self.check_emit(id);
            }
        }
    }

    fn recheck(&mut self, id: TaskId) {
        match self.arena.get(id).map(|r| (r.state, r.queued, r.is_slave())) {
            Some((TaskState::Ready, false, false)) => self.check_emit(id),
            Some((state, _, _)) => debug!(%id, %state, "wake ignored"),
            None => warn!(%id, "wake for an unknown or finalized item"),
        }
    }

    /// Evaluate the eligibility gate and emit the chain if it passes
    fn check_emit(&mut self, id: TaskId) {
        let Some(rec) = self.arena.get_mut(id) else {
            self.bug(id, "eligibility check on a missing item");
            return;
        };
        if rec.flags.intersects(TaskFlags::EMITTED | TaskFlags::WAITING) {
            debug!(%id, flags = %rec.flags, "eligibility check ignored");
            return;
        }
        if rec.state != TaskState::Ready {
            let what = format!("eligibility check in state {}", rec.state);
            self.bug(id, &what);
            return;
        }
        if rec.pending > 0 {
            trace!(%id, pending = rec.pending, "waiting for predecessors");
            return;
        }
        let Some(work) = rec.work.as_mut() else {
            self.bug(id, "ready item without a payload");
            return;
        };
        let log = &mut rec.log;
        match guarded(TaskError::Gate, || Ok(work.check_emit(log))) {
            Ok(true) => {}
            Ok(false) => {
                trace!(%id, "held by eligibility gate");
                return;
            }
            Err(err) => {
                ManagerStats::bump(&self.shared.stats.run_failures);
                warn!(%id, error = %err, "eligibility gate failed");
                self.fail_chain(id, Outcome::Failed(err), DumpReason::RunFailed);
                return;
            }
        }

        let inline = rec.flags.contains(TaskFlags::INLINE);
        let job = self.take_job(id);
        if inline {
            ManagerStats::bump(&self.shared.stats.emitted_inline);
            self.run_inline(job);
        } else {
            ManagerStats::bump(&self.shared.stats.emitted_pool);
            if let Err(job) = self.pool.submit(job) {
                warn!(%id, "worker pool rejected job, running inline");
                self.run_inline(job);
            }
        }
    }

    fn run_inline(&mut self, mut job: Job) {
        job.execute();
        self.complete(job);
    }

    /// Detach payloads and logs of a chain into a job
    fn take_job(&mut self, master: TaskId) -> Job {
        let chain = self.chain_of(master);
        let mut units = Vec::with_capacity(chain.len());
        let mut missing = Vec::new();

        for link in chain {
            let Some(rec) = self.arena.get_mut(link) else {
                missing.push(link);
                continue;
            };
            rec.flags.insert(TaskFlags::EMITTED);
            match rec.work.take() {
                Some(work) => units.push(JobUnit {
                    id: link,
                    work,
                    log: std::mem::take(&mut rec.log),
                    result: None,
                }),
                None => missing.push(link),
            }
        }
        for link in missing {
            self.bug(link, "chain link without a payload at emission");
        }
        Job { master, units }
    }

    /// Reattach a finished job and move its chain to `Done`
    fn complete(&mut self, job: Job) {
        let Job { master, units } = job;

        for unit in units {
            let JobUnit {
                id,
                work,
                log,
                result,
            } = unit;
            let Some(rec) = self.arena.get_mut(id) else {
                self.bug(id, "completed item vanished");
                continue;
            };
            rec.work = Some(work);
            rec.log = log;
            rec.flags.remove(TaskFlags::EMITTED);

            let outcome = match result {
                Some(Ok(())) => Outcome::Completed,
                Some(Err(err)) => {
                    rec.mark_dump(DumpReason::RunFailed);
                    ManagerStats::bump(&self.shared.stats.run_failures);
                    warn!(%id, error = %err, "run failed");
                    Outcome::Failed(err)
                }
                None => {
                    rec.mark_dump(DumpReason::RunFailed);
                    Outcome::Failed(TaskError::run("job returned without running"))
                }
            };
            rec.outcome = Some(outcome);
            self.set_state(id, TaskState::Done);
        }

        self.finalize(master);
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    /// Finalize a chain: slaves first, then the master. On master success
    /// its dependents are notified and the record destroyed.
    fn finalize(&mut self, id: TaskId) {
        match self.arena.get(id) {
            Some(rec) if rec.finalized => {
                self.bug(id, "finalize requested twice");
                return;
            }
            Some(rec) if rec.state != TaskState::Done => {
                let what = format!("finalize in state {}", rec.state);
                self.bug(id, &what);
                return;
            }
            Some(_) => {}
            None => {
                self.bug(id, "finalize on a missing item");
                return;
            }
        }

        let chain = self.chain_of(id);
        for &slave in &chain[1..] {
            if self.finalize_one(slave) {
                self.destroy(slave);
            }
        }

        if self.finalize_one(id) {
            let dependents = self
                .arena
                .get_mut(id)
                .map(|r| std::mem::take(&mut r.dependents))
                .unwrap_or_default();
            self.notify(id, dependents);
            self.destroy(id);
        }
    }

    /// Run one record's finalize hook. `true` when it reached `Dead`.
    fn finalize_one(&mut self, id: TaskId) -> bool {
        let Some(rec) = self.arena.get_mut(id) else {
            self.bug(id, "finalize on a missing chain link");
            return false;
        };
        if rec.finalized {
            self.bug(id, "chain link finalized twice");
            return false;
        }
        rec.finalized = true;

        let outcome = rec.outcome.clone().unwrap_or(Outcome::Completed);
        let start = Instant::now();
        let result = match rec.work.as_mut() {
            Some(work) => {
                let log = &mut rec.log;
                guarded(TaskError::Finalize, || work.finalize(&outcome, log))
            }
            None => Err(TaskError::finalize("payload missing at finalize")),
        };
        note_budget(
            &self.shared.stats,
            rec,
            "finalize",
            start.elapsed(),
            self.finalize_budget,
        );

        match result {
            Ok(()) => {
                ManagerStats::bump(&self.shared.stats.finalized);
                self.set_state(id, TaskState::Dead)
            }
            Err(err) => {
                rec.mark_dump(DumpReason::FinalizeFailed);
                ManagerStats::bump(&self.shared.stats.finalize_failures);
                ManagerStats::bump(&self.shared.stats.leaked);
                self.set_state(id, TaskState::Invalid);
                self.leak(id, &err);
                false
            }
        }
    }

    fn leak(&self, id: TaskId, err: &TaskError) {
        let Some(rec) = self.arena.get(id) else {
            return;
        };
        let report = render_report(rec);
        error!(
            target: "taskman::leak",
            %id,
            error = %err,
            "finalize failed, item leaked\n{}",
            report
        );
        self.shared.diagnostics.task_leaked(id, &rec.description);
        self.shared.diagnostics.task_dump(TaskDump {
            id,
            description: rec.description.clone(),
            reasons: rec.dump_reasons.clone(),
            report,
        });
    }

    fn notify(&mut self, from: TaskId, dependents: Vec<(TaskId, u64)>) {
        for (dep_id, context) in dependents {
            match self.arena.lookup(dep_id) {
                Lookup::Live => {}
                Lookup::Destroyed => {
                    // Its own setup failed and it finalized first
                    trace!(%from, dependent = %dep_id, "dependent already gone");
                    continue;
                }
                Lookup::Unknown => {
                    self.bug(dep_id, "dependent was never installed");
                    continue;
                }
            }

            let mut underflow = false;
            let mut requeue = false;
            if let Some(dep) = self.arena.get_mut(dep_id) {
                match dep.pending.checked_sub(1) {
                    Some(p) => dep.pending = p,
                    None => underflow = true,
                }
                if let Some(work) = dep.work.as_mut() {
                    if panic::catch_unwind(AssertUnwindSafe(|| work.notified(from, context))).is_err()
                    {
                        warn!(%from, dependent = %dep_id, "notification hook panicked");
                    }
                }
                if dep.pending == 0
                    && dep.state == TaskState::Ready
                    && !dep.queued
                    && !dep.flags.intersects(TaskFlags::EMITTED | TaskFlags::WAITING)
                {
                    dep.queued = true;
                    requeue = true;
                }
            }

            if underflow {
                self.bug(dep_id, "notified with no pending predecessors");
            }
            if requeue {
                self.shared.queue.push(Dispatch::Handle(dep_id));
            }
        }
    }

    /// Remove a `Dead` record and release its handle
    fn destroy(&mut self, id: TaskId) {
        let Some(rec) = self.arena.remove(id) else {
            self.bug(id, "destroy on a missing item");
            return;
        };
        self.flush(&rec);
        self.shared.handles.release(id);
        ManagerStats::bump(&self.shared.stats.destroyed);
        self.shared.diagnostics.task_destroyed(id);
        trace!(%id, "destroyed");
    }

    /// Emit the item's log if it was flagged for a dump or logging is on
    fn flush(&self, rec: &TaskRecord) {
        if rec.flags.contains(TaskFlags::DUMP) {
            let report = render_report(rec);
            warn!(target: "taskman::dump", id = %rec.id, "{}", report);
            self.shared.diagnostics.task_dump(TaskDump {
                id: rec.id,
                description: rec.description.clone(),
                reasons: rec.dump_reasons.clone(),
                report,
            });
        } else if (self.log_all || rec.flags.contains(TaskFlags::LOGGING)) && !rec.log.is_empty() {
            info!(
                target: "taskman::log",
                id = %rec.id,
                "{}\n{}",
                rec.description,
                rec.log
            );
        }
    }

    // ------------------------------------------------------------------
    // Introspection and exit
    // ------------------------------------------------------------------

    fn snapshots(&self) -> Vec<TaskSnapshot> {
        let now = Instant::now();
        self.arena
            .iter()
            .map(|rec| {
                let slaves = if rec.is_slave() {
                    Vec::new()
                } else {
                    self.chain_of(rec.id).split_off(1)
                };
                TaskSnapshot::capture(rec, slaves, now)
            })
            .collect()
    }

    fn finish(mut self) -> ShutdownReport {
        let deferred = self.deferred.stats();
        let deferred_abandoned = deferred.pending;
        if deferred_abandoned > 0 {
            warn!(deferred_abandoned, "dispatcher stopping with deferred items");
        }

        let pool = self.pool.shutdown();

        // Completions that raced the stop are still finalized. Anything
        // else would need the pool or a new emission and is dropped.
        let mut completions_drained = 0;
        let mut messages_dropped = 0;
        loop {
            let batch = self.shared.queue.drain();
            if batch.is_empty() {
                break;
            }
            for msg in batch {
                match msg {
                    Dispatch::Completed(job) => {
                        completions_drained += 1;
                        self.complete(job);
                    }
                    Dispatch::Inspect(reply) => {
                        let _ = reply.send(self.snapshots());
                    }
                    _ => messages_dropped += 1,
                }
            }
        }

        self.publish_gauges();
        let report = ShutdownReport {
            deferred_abandoned,
            deferred,
            jobs_abandoned: pool.abandoned,
            completions_drained,
            messages_dropped,
            live_tasks: self.arena.live(),
            pool,
            stats: self.shared.stats.snapshot(),
        };
        info!(%report, "dispatcher stopped");
        report
    }
}

/// Run a hook, turning a panic into an error built by `wrap`
fn guarded<T>(
    wrap: fn(String) -> TaskError,
    f: impl FnOnce() -> Result<T, TaskError>,
) -> Result<T, TaskError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(wrap(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        String::from("panicked")
    }
}

fn note_budget(
    stats: &ManagerStats,
    rec: &mut TaskRecord,
    hook: &'static str,
    took: Duration,
    budget: Duration,
) {
    if budget.is_zero() || took <= budget {
        return;
    }
    warn!(
        id = %rec.id,
        hook,
        took_us = took.as_micros() as u64,
        budget_us = budget.as_micros() as u64,
        "hook exceeded its time budget"
    );
    rec.mark_dump(DumpReason::BudgetExceeded { hook, took });
    ManagerStats::bump(&stats.budget_overruns);
}

/// Multi-line state dump of one record
fn render_report(rec: &TaskRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} \"{}\" state={} flags={} pending={}",
        rec.id, rec.description, rec.state, rec.flags, rec.pending
    );
    if !rec.dump_reasons.is_empty() {
        let reasons: Vec<_> = rec.dump_reasons.iter().map(|r| r.to_string()).collect();
        let _ = writeln!(out, "  reasons: {}", reasons.join(", "));
    }
    if let Some(outcome) = &rec.outcome {
        let _ = writeln!(out, "  outcome: {:?}", outcome);
    }
    if let Some(master) = rec.master {
        let _ = writeln!(out, "  slave of: {}", master);
    }
    if !rec.dependents.is_empty() {
        let deps: Vec<_> = rec.dependents.iter().map(|(id, _)| id.to_string()).collect();
        let _ = writeln!(out, "  dependents: {}", deps.join(" "));
    }
    if !rec.log.is_empty() {
        let _ = write!(out, "{}", rec.log);
    }
    out
}
