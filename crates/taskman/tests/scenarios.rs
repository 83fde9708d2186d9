//! End-to-end scheduler scenarios against a running task manager

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use taskman::prelude::*;
use taskman::{DiagnosticSink, DumpReason, TaskRegistry, TaskState};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn start(config: ManagerConfig) -> (TaskManager, Arc<TaskRegistry>) {
    init_tracing();
    let registry = Arc::new(TaskRegistry::new());
    let manager = TaskManager::with_diagnostics(config, registry.clone());
    manager.initialise().unwrap();
    (manager, registry)
}

fn config() -> ManagerConfig {
    ManagerConfig::defaults().num_workers(4).diagnostics(true)
}

type Events = Arc<Mutex<Vec<String>>>;

/// Payload that records every hook call and fails on demand
struct Probe {
    name: String,
    events: Events,
    fail_setup: bool,
    fail_run: bool,
    fail_finalize: bool,
    setup_delay: Duration,
    run_delay: Duration,
    gate: Option<Arc<AtomicBool>>,
}

impl Probe {
    fn new(name: &str, events: &Events) -> Self {
        Self {
            name: name.to_string(),
            events: Arc::clone(events),
            fail_setup: false,
            fail_run: false,
            fail_finalize: false,
            setup_delay: Duration::ZERO,
            run_delay: Duration::ZERO,
            gate: None,
        }
    }

    fn record(&self, what: impl std::fmt::Display) {
        self.events.lock().unwrap().push(format!("{}:{}", self.name, what));
    }

    fn task(self) -> Task {
        Task::new(self)
    }
}

impl Work for Probe {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn setup(&mut self, log: &mut TaskLog) -> Result<(), TaskError> {
        thread::sleep(self.setup_delay);
        self.record("setup");
        log.push("setup");
        if self.fail_setup {
            return Err(TaskError::setup("no buffer"));
        }
        Ok(())
    }

    fn check_emit(&mut self, _log: &mut TaskLog) -> bool {
        self.gate.as_ref().map_or(true, |g| g.load(Ordering::Acquire))
    }

    fn run(&mut self, _log: &mut TaskLog) -> Result<(), TaskError> {
        thread::sleep(self.run_delay);
        self.record("run");
        if self.fail_run {
            return Err(TaskError::run("bad frame"));
        }
        Ok(())
    }

    fn finalize(&mut self, outcome: &Outcome, _log: &mut TaskLog) -> Result<(), TaskError> {
        let tag = match outcome {
            Outcome::Completed => "completed",
            Outcome::SetupFailed(_) => "setup-failed",
            Outcome::Failed(_) => "failed",
        };
        self.record(format!("finalize({})", tag));
        if self.fail_finalize {
            return Err(TaskError::finalize("fence stuck"));
        }
        Ok(())
    }

    fn notified(&mut self, from: TaskId, context: u64) {
        self.record(format!("notified({},{})", from, context));
    }
}

fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

fn snapshot(events: &Events) -> Vec<String> {
    events.lock().unwrap().clone()
}

fn position(events: &[String], needle: &str) -> usize {
    events
        .iter()
        .position(|e| e == needle)
        .unwrap_or_else(|| panic!("{} not in {:?}", needle, events))
}

#[test]
fn deferred_item_is_waiting_until_due() {
    let (manager, _registry) = start(config());
    let ev = events();
    let pushed = Instant::now();
    let ran_at = Arc::new(Mutex::new(None));
    let ran = Arc::clone(&ran_at);

    let id = manager
        .push(
            Task::from_fn("late", move |_| {
                *ran.lock().unwrap() = Some(Instant::now());
                Ok(())
            })
            .ready_in(Duration::from_millis(50)),
        )
        .unwrap();
    manager.push(Probe::new("early", &ev).task()).unwrap();

    let snaps = manager.inspect().unwrap();
    let late = snaps.iter().find(|s| s.id == id).expect("deferred item is live");
    assert!(late.is_waiting());
    assert_eq!(late.state, TaskState::Flushed);
    assert!(late.ready_in_us.unwrap() > 0);
    assert!(manager.dump_tasks().unwrap().contains("WAITING"));

    assert_eq!(manager.sync_all_timeout(Duration::from_secs(5)), SyncOutcome::Drained);
    let ran_at = ran_at.lock().unwrap().expect("deferred item ran");
    assert!(ran_at >= pushed + Duration::from_millis(50));
    assert_eq!(position(&snapshot(&ev), "early:run"), 1);

    let stats = manager.stats();
    assert_eq!(stats.deferred, 1);
    assert_eq!(stats.destroyed, 2);
    manager.shutdown().unwrap();
}

#[test]
fn eight_producers_each_item_handled_once() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 125;

    let (manager, _registry) = start(config());
    let manager = Arc::new(manager);
    let ev = events();
    let runs: Arc<Vec<AtomicUsize>> =
        Arc::new((0..PRODUCERS * PER_PRODUCER).map(|_| AtomicUsize::new(0)).collect());

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let manager = Arc::clone(&manager);
            let ev = Arc::clone(&ev);
            let runs = Arc::clone(&runs);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let slot = p * PER_PRODUCER + i;
                    let runs = Arc::clone(&runs);
                    let probe = Probe::new(&format!("{}/{}", p, i), &ev);
                    let task = Task::new(probe).slave(Task::from_fn("count", move |_| {
                        runs[slot].fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }));
                    manager.push(task).unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    assert_eq!(manager.sync_all_timeout(Duration::from_secs(10)), SyncOutcome::Drained);
    assert!(runs.iter().all(|r| r.load(Ordering::Relaxed) == 1));

    // Setup happens in handling order: per-producer order must hold
    let mut last = vec![None::<usize>; PRODUCERS];
    for e in snapshot(&ev).iter().filter(|e| e.ends_with(":setup")) {
        let (p, i) = e.trim_end_matches(":setup").split_once('/').unwrap();
        let (p, i): (usize, usize) = (p.parse().unwrap(), i.parse().unwrap());
        if let Some(prev) = last[p] {
            assert!(i > prev, "producer {} handled {} after {}", p, i, prev);
        }
        last[p] = Some(i);
    }
    assert!(last.iter().all(|l| *l == Some(PER_PRODUCER - 1)));

    let stats = manager.stats();
    assert_eq!(stats.submitted, (PRODUCERS * PER_PRODUCER * 2) as u64);
    assert_eq!(stats.destroyed, stats.submitted);
    assert_eq!(stats.bugs, 0);
    manager.shutdown().unwrap();
}

#[test]
fn single_producer_is_fifo() {
    let (manager, _registry) = start(config());
    let ev = events();
    for i in 0..200 {
        manager.push(Probe::new(&i.to_string(), &ev).task()).unwrap();
    }
    assert_eq!(manager.sync_all_timeout(Duration::from_secs(10)), SyncOutcome::Drained);

    let setups: Vec<usize> = snapshot(&ev)
        .iter()
        .filter_map(|e| e.strip_suffix(":setup"))
        .map(|n| n.parse().unwrap())
        .collect();
    assert_eq!(setups, (0..200).collect::<Vec<_>>());
    manager.shutdown().unwrap();
}

#[test]
fn setup_failure_skips_run_and_still_finalizes() {
    let (manager, registry) = start(config());
    let ev = events();
    let mut broken = Probe::new("broken", &ev);
    broken.fail_setup = true;
    let id = manager.push(broken.task()).unwrap();
    manager
        .push(Probe::new("waiter", &ev).task().after(id))
        .unwrap();

    assert_eq!(manager.sync_all_timeout(Duration::from_secs(5)), SyncOutcome::Drained);
    let ev = snapshot(&ev);
    assert!(!ev.contains(&"broken:run".to_string()));
    assert!(position(&ev, "broken:finalize(setup-failed)") < position(&ev, "waiter:run"));

    let dumps = registry.dumps();
    assert_eq!(dumps.len(), 1);
    assert_eq!(dumps[0].id, id);
    assert!(dumps[0].reasons.contains(&DumpReason::SetupFailed));
    assert!(dumps[0].report.contains("setup"));

    let stats = manager.stats();
    assert_eq!(stats.setup_failures, 1);
    assert_eq!(stats.emitted_pool, 1);
    manager.shutdown().unwrap();
}

#[test]
fn run_failure_is_dumped_and_finalized() {
    let (manager, registry) = start(config());
    let ev = events();
    let mut bad = Probe::new("bad", &ev);
    bad.fail_run = true;
    bad.run_delay = Duration::from_millis(50);
    let bad_id = manager.push(bad.task()).unwrap();
    manager
        .push(Probe::new("waiter", &ev).task().after_with(bad_id, 7))
        .unwrap();

    assert_eq!(manager.sync_all_timeout(Duration::from_secs(5)), SyncOutcome::Drained);
    let ev = snapshot(&ev);
    assert!(position(&ev, "bad:finalize(failed)") < position(&ev, &format!("waiter:notified({},7)", bad_id)));
    assert!(position(&ev, &format!("waiter:notified({},7)", bad_id)) < position(&ev, "waiter:run"));
    assert_eq!(manager.stats().run_failures, 1);
    assert!(registry.dumps()[0].reasons.contains(&DumpReason::RunFailed));
    manager.shutdown().unwrap();
}

#[test]
fn finalize_failure_leaks_and_blocks_dependents() {
    let (manager, registry) = start(config());
    let ev = events();
    let mut stuck = Probe::new("stuck", &ev);
    stuck.fail_finalize = true;
    let stuck_id = manager.push(stuck.task()).unwrap();
    let waiter_id = manager
        .push(Probe::new("waiter", &ev).task().after(stuck_id))
        .unwrap();

    let outcome = manager.sync_all_timeout(Duration::from_millis(200));
    assert_eq!(outcome, SyncOutcome::TimedOut { outstanding: 2 });

    let snaps = manager.inspect().unwrap();
    let stuck = snaps.iter().find(|s| s.id == stuck_id).expect("leaked item stays");
    assert_eq!(stuck.state, TaskState::Invalid);
    assert_eq!(stuck.dependents, vec![waiter_id]);
    let waiter = snaps.iter().find(|s| s.id == waiter_id).unwrap();
    assert_eq!(waiter.state, TaskState::Ready);
    assert_eq!(waiter.pending, 1);

    let ev = snapshot(&ev);
    assert!(!ev.iter().any(|e| e.starts_with("waiter:notified")));
    assert!(!ev.contains(&"waiter:run".to_string()));

    let stats = manager.stats();
    assert_eq!(stats.leaked, 1);
    assert_eq!(stats.finalize_failures, 1);
    assert_eq!(registry.leaked(), vec![(stuck_id, "stuck".to_string())]);
    let mut outstanding = registry.outstanding();
    outstanding.sort_by_key(|(_, d)| d.clone());
    assert_eq!(
        outstanding,
        vec![(stuck_id, "stuck".to_string()), (waiter_id, "waiter".to_string())]
    );

    let report = manager.shutdown().unwrap();
    assert_eq!(report.live_tasks, 2);
}

#[test]
fn leaked_item_is_never_drained() {
    let (manager, registry) = start(config());
    let ev = events();
    let mut stuck = Probe::new("stuck", &ev);
    stuck.fail_finalize = true;
    let id = manager.push(stuck.task()).unwrap();

    // Let it run and leak before waiting
    let deadline = Instant::now() + Duration::from_secs(5);
    while manager.stats().leaked == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(manager.stats().leaked, 1);

    let start = Instant::now();
    let outcome = manager.sync_all_timeout(Duration::from_millis(100));
    assert_eq!(outcome, SyncOutcome::TimedOut { outstanding: 1 });
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(registry.outstanding(), vec![(id, "stuck".to_string())]);

    let report = manager.shutdown().unwrap();
    assert_eq!(report.live_tasks, 1);
    assert_eq!(report.stats.leaked, 1);
}

#[test]
fn shutdown_with_in_flight_work_then_bounded_sync() {
    let (manager, _registry) = start(config().num_workers(2));
    let ev = events();
    for i in 0..5 {
        let mut slow = Probe::new(&format!("slow{}", i), &ev);
        slow.run_delay = Duration::from_millis(100);
        manager.push(slow.task()).unwrap();
    }
    thread::sleep(Duration::from_millis(20));

    let report = manager.shutdown().unwrap();
    assert!(!manager.is_active());
    assert_eq!(report.deferred_abandoned, 0);
    let stats = manager.stats();
    assert_eq!(stats.destroyed as usize + report.jobs_abandoned, 5);

    let start = Instant::now();
    let outcome = manager.sync_all_timeout(Duration::from_millis(100));
    assert!(start.elapsed() < Duration::from_secs(2));
    match outcome {
        SyncOutcome::Drained => assert_eq!(report.jobs_abandoned, 0),
        SyncOutcome::TimedOut { outstanding } => assert_eq!(outstanding, report.jobs_abandoned),
        SyncOutcome::Untracked => panic!("diagnostics are enabled"),
    }

    // Nothing moves after shutdown
    let after = manager.stats();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(manager.stats(), after);
}

#[test]
fn disabled_manager_rejects_pushes() {
    init_tracing();
    let manager = TaskManager::new(config().enabled(false));
    manager.initialise().unwrap();
    assert!(!manager.is_active());

    match manager.push(Task::from_fn("ignored", |_| Ok(()))) {
        Err(PushError::Inactive(task)) => assert_eq!(task.description(), "ignored"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(manager.dump_tasks().unwrap_err(), SchedError::Inactive);
    assert!(manager.shutdown().is_ok());
}

#[test]
fn untracked_sync_returns_immediately() {
    init_tracing();
    let manager = TaskManager::new(ManagerConfig::defaults().diagnostics(false));
    manager.initialise().unwrap();
    assert_eq!(manager.sync_all(), SyncOutcome::Untracked);
    manager.shutdown().unwrap();
}

#[test]
fn held_item_runs_after_wake() {
    let (manager, _registry) = start(config());
    let ev = events();
    let gate = Arc::new(AtomicBool::new(false));
    let mut held = Probe::new("held", &ev);
    held.gate = Some(Arc::clone(&gate));
    let id = manager.push(held.task()).unwrap();

    assert_eq!(
        manager.sync_all_timeout(Duration::from_millis(50)),
        SyncOutcome::TimedOut { outstanding: 1 }
    );
    let snaps = manager.inspect().unwrap();
    assert_eq!(snaps[0].state, TaskState::Ready);
    assert!(!snapshot(&ev).contains(&"held:run".to_string()));

    gate.store(true, Ordering::Release);
    manager.wake_task(id).unwrap();
    assert_eq!(manager.sync_all_timeout(Duration::from_secs(5)), SyncOutcome::Drained);
    assert!(snapshot(&ev).contains(&"held:run".to_string()));
    manager.shutdown().unwrap();
}

#[test]
fn slave_chain_shares_master_fan_out() {
    let (manager, _registry) = start(config());
    let ev = events();
    let chain = Probe::new("master", &ev)
        .task()
        .slave(Probe::new("slave", &ev).task());
    let master = manager.push(chain).unwrap();
    manager
        .push(Probe::new("after", &ev).task().after(master).inline())
        .unwrap();

    assert_eq!(manager.sync_all_timeout(Duration::from_secs(5)), SyncOutcome::Drained);
    let ev = snapshot(&ev);
    assert!(position(&ev, "master:run") < position(&ev, "slave:run"));
    assert!(position(&ev, "slave:finalize(completed)") < position(&ev, "master:finalize(completed)"));
    assert!(position(&ev, "master:finalize(completed)") < position(&ev, "after:run"));
    assert_eq!(manager.stats().emitted_inline, 1);
    manager.shutdown().unwrap();
}

#[test]
fn slow_setup_is_reported() {
    let (manager, registry) = start(config().setup_budget(Duration::from_millis(1)));
    let ev = events();
    let mut slow = Probe::new("slow-setup", &ev);
    slow.setup_delay = Duration::from_millis(10);
    manager.push(slow.task()).unwrap();

    assert_eq!(manager.sync_all_timeout(Duration::from_secs(5)), SyncOutcome::Drained);
    assert_eq!(manager.stats().budget_overruns, 1);
    let dumps = registry.dumps();
    assert!(matches!(
        dumps[0].reasons[0],
        DumpReason::BudgetExceeded { hook: "setup", .. }
    ));
    manager.shutdown().unwrap();
}
