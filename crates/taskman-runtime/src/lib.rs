//! # taskman-runtime
//!
//! Threads and data structures behind the taskman scheduler.
//!
//! This crate provides:
//! - The work queue between producers and the dispatcher
//! - The deferred-readiness set for items with a `ready_at`
//! - The fixed-size worker pool and its idle parking
//! - The dispatcher loop and its task arena
//! - [`TaskManager`], the context object producers talk to
//! - A tracking diagnostics registry and scheduler counters

pub mod config;
pub mod queue;
pub mod deferred;
pub mod parking;
pub mod worker;
pub mod arena;
pub mod stats;
pub mod registry;
pub mod dump;
mod dispatcher;
pub mod manager;

// Re-exports
pub use config::ManagerConfig;
pub use queue::WorkQueue;
pub use deferred::{DeferredSet, DeferredStats};
pub use parking::{new_parking, WorkerParking};
pub use worker::{PoolStats, WorkerPool};
pub use stats::{ManagerStats, StatsSnapshot};
pub use registry::TaskRegistry;
pub use dump::{render_tree, TaskSnapshot};
pub use dispatcher::ShutdownReport;
pub use manager::TaskManager;
