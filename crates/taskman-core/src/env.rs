//! Environment variable helpers for configuration overrides
//!
//! ```ignore
//! use taskman_core::env::{env_get, env_get_bool, env_get_micros};
//!
//! let workers: usize = env_get("TASKMAN_NUM_WORKERS", 4);
//! let enabled = env_get_bool("TASKMAN_ENABLED", true);
//! let budget = env_get_micros("TASKMAN_SETUP_BUDGET_US", 3000);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, falling back to `default` when unset or malformed
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Boolean switch. "1", "true", "yes", "on" are true and "0", "false",
/// "no", "off" are false (case-insensitive). Anything else keeps `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Duration given in milliseconds
#[inline]
pub fn env_get_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}

/// Duration given in microseconds
#[inline]
pub fn env_get_micros(key: &str, default_us: u64) -> Duration {
    Duration::from_micros(env_get(key, default_us))
}
