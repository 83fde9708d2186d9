//! Task manager configuration
//!
//! Library defaults with runtime environment overrides, then builder
//! methods on top.
//!
//! ```rust,ignore
//! use taskman_runtime::config::ManagerConfig;
//!
//! let config = ManagerConfig::from_env()
//!     .num_workers(8)
//!     .sync_timeout(Duration::from_secs(2));
//! ```

use std::time::Duration;

use taskman_core::constants::{
    DEFAULT_FINALIZE_BUDGET_US, DEFAULT_MAX_TASKS, DEFAULT_NUM_WORKERS, DEFAULT_PARK_TIMEOUT_US,
    DEFAULT_SETUP_BUDGET_US, DEFAULT_SYNC_TIMEOUT_MS, MAX_WORKERS,
};
use taskman_core::env::{env_get, env_get_bool, env_get_micros, env_get_millis};
use taskman_core::error::{SchedError, SchedResult};

/// Task manager configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Create the dispatcher thread and worker pool at all
    pub enabled: bool,
    /// Worker threads in the pool
    pub num_workers: usize,
    /// Live handles before `push` is rejected
    pub max_tasks: usize,
    /// Upper bound for `sync_all()`
    pub sync_timeout: Duration,
    /// `setup()` time budget, zero disables the check
    pub setup_budget: Duration,
    /// `finalize()` time budget, zero disables the check
    pub finalize_budget: Duration,
    /// Idle worker park timeout
    pub park_timeout: Duration,
    /// Flush every item's log, not only failed ones
    pub log_all: bool,
    /// Track live items for `sync_all()` and leak detection
    pub diagnostics: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ManagerConfig {
    /// Library defaults, ignoring the environment
    pub fn defaults() -> Self {
        Self {
            enabled: true,
            num_workers: DEFAULT_NUM_WORKERS,
            max_tasks: DEFAULT_MAX_TASKS,
            sync_timeout: Duration::from_millis(DEFAULT_SYNC_TIMEOUT_MS),
            setup_budget: Duration::from_micros(DEFAULT_SETUP_BUDGET_US),
            finalize_budget: Duration::from_micros(DEFAULT_FINALIZE_BUDGET_US),
            park_timeout: Duration::from_micros(DEFAULT_PARK_TIMEOUT_US),
            log_all: false,
            diagnostics: false,
        }
    }

    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `TASKMAN_ENABLED` - create dispatcher and pool (0/1)
    /// - `TASKMAN_NUM_WORKERS` - pool size
    /// - `TASKMAN_MAX_TASKS` - live handle limit
    /// - `TASKMAN_SYNC_TIMEOUT_MS` - `sync_all()` bound in milliseconds
    /// - `TASKMAN_SETUP_BUDGET_US` - setup budget in microseconds
    /// - `TASKMAN_FINALIZE_BUDGET_US` - finalize budget in microseconds
    /// - `TASKMAN_PARK_TIMEOUT_US` - idle worker park timeout
    /// - `TASKMAN_LOG_ALL` - flush every item's log (0/1)
    /// - `TASKMAN_DIAGNOSTICS` - track live items (0/1)
    pub fn from_env() -> Self {
        let d = Self::defaults();
        Self {
            enabled: env_get_bool("TASKMAN_ENABLED", d.enabled),
            num_workers: env_get("TASKMAN_NUM_WORKERS", d.num_workers),
            max_tasks: env_get("TASKMAN_MAX_TASKS", d.max_tasks),
            sync_timeout: env_get_millis("TASKMAN_SYNC_TIMEOUT_MS", DEFAULT_SYNC_TIMEOUT_MS),
            setup_budget: env_get_micros("TASKMAN_SETUP_BUDGET_US", DEFAULT_SETUP_BUDGET_US),
            finalize_budget: env_get_micros(
                "TASKMAN_FINALIZE_BUDGET_US",
                DEFAULT_FINALIZE_BUDGET_US,
            ),
            park_timeout: env_get_micros("TASKMAN_PARK_TIMEOUT_US", DEFAULT_PARK_TIMEOUT_US),
            log_all: env_get_bool("TASKMAN_LOG_ALL", d.log_all),
            diagnostics: env_get_bool("TASKMAN_DIAGNOSTICS", d.diagnostics),
        }
    }

    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the dispatcher and pool
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the pool size
    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    /// Set the live handle limit
    pub fn max_tasks(mut self, n: usize) -> Self {
        self.max_tasks = n;
        self
    }

    /// Set the `sync_all()` bound
    pub fn sync_timeout(mut self, d: Duration) -> Self {
        self.sync_timeout = d;
        self
    }

    /// Set the setup budget (zero disables)
    pub fn setup_budget(mut self, d: Duration) -> Self {
        self.setup_budget = d;
        self
    }

    /// Set the finalize budget (zero disables)
    pub fn finalize_budget(mut self, d: Duration) -> Self {
        self.finalize_budget = d;
        self
    }

    /// Set the idle worker park timeout
    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    /// Flush every item's log
    pub fn log_all(mut self, enable: bool) -> Self {
        self.log_all = enable;
        self
    }

    /// Track live items
    pub fn diagnostics(mut self, enable: bool) -> Self {
        self.diagnostics = enable;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> SchedResult<()> {
        if self.num_workers == 0 {
            return Err(SchedError::InvalidConfig("num_workers must be at least 1"));
        }
        if self.num_workers > MAX_WORKERS {
            return Err(SchedError::InvalidConfig("num_workers exceeds maximum"));
        }
        if self.max_tasks == 0 {
            return Err(SchedError::InvalidConfig("max_tasks must be at least 1"));
        }
        if self.park_timeout.is_zero() {
            return Err(SchedError::InvalidConfig("park_timeout must be non-zero"));
        }
        Ok(())
    }
}
