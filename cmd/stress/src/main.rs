//! Stress test - many producers, dependency chains and deferred items
//!
//! Usage: `stress [items-per-producer] [producers]`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use taskman::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Push, retrying while the slot table is full
fn push_retry(manager: &TaskManager, mut task: Task) -> Option<TaskId> {
    loop {
        match manager.push(task) {
            Ok(id) => return Some(id),
            Err(PushError::Exhausted(t)) => {
                task = t;
                thread::sleep(Duration::from_micros(200));
            }
            Err(e) => {
                warn!(error = %e, "push rejected");
                return None;
            }
        }
    }
}

fn produce(manager: &TaskManager, producer: usize, count: usize, ran: &Arc<AtomicU64>) {
    let mut previous: Option<TaskId> = None;

    for i in 0..count {
        let counter = Arc::clone(ran);
        let mut task = Task::from_fn(format!("p{}/{}", producer, i), move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        // Every 4th item continues the producer's chain
        if i % 4 == 0 {
            if let Some(prev) = previous {
                task = task.after_with(prev, i as u64);
            }
        }
        // Every 16th item is deferred a little
        if i % 16 == 0 {
            task = task.ready_in(Duration::from_micros(((i % 7) as u64 + 1) * 250));
        }
        // Every 32nd item carries a slave
        if i % 32 == 0 {
            let counter = Arc::clone(ran);
            task = task.slave(Task::from_fn("slave", move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }));
        }
        // Every 64th item runs inline on the dispatcher
        if i % 64 == 0 {
            task = task.inline();
        }

        match push_retry(manager, task) {
            Some(id) if i % 4 == 0 => previous = Some(id),
            Some(_) => {}
            None => return,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== taskman Stress Test ===\n");

    let per_producer: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(10_000);
    let producers: usize = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(8);

    let config = ManagerConfig::from_env().diagnostics(true);
    let manager = Arc::new(TaskManager::new(config));
    manager.initialise()?;
    info!(producers, per_producer, "pushing");

    let ran = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let manager = Arc::clone(&manager);
            let ran = Arc::clone(&ran);
            thread::Builder::new()
                .name(format!("producer-{}", p))
                .spawn(move || produce(&manager, p, per_producer, &ran))
        })
        .collect::<Result<_, _>>()?;
    for h in handles {
        if h.join().is_err() {
            warn!("producer panicked");
        }
    }
    let push_time = start.elapsed();

    println!("Waiting for completion...");
    let outcome = manager.sync_all_timeout(Duration::from_secs(60));
    let total_time = start.elapsed();

    let stats = manager.stats();
    let report = manager.shutdown()?;

    println!("\n=== Results ===");
    println!("Sync:            {:?}", outcome);
    println!("Payloads run:    {}", ran.load(Ordering::Relaxed));
    println!("Push time:       {:?}", push_time);
    println!("Total time:      {:?}", total_time);
    println!(
        "Throughput:      {:.0} items/sec",
        stats.submitted as f64 / total_time.as_secs_f64()
    );
    println!("Stats:           {}", stats);
    println!("Shutdown:        {}", report);

    println!("\n=== Stress Test Complete ===");
    Ok(())
}
