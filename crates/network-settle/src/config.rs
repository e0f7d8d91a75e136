//! Timing configuration for the settle watcher.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Zero in-flight requests must hold this long before the page counts as settled.
pub const QUIET_WINDOW_MS: u64 = 500;
/// Requests in flight at least this long are force-completed by the sweep.
pub const STALL_THRESHOLD_MS: u64 = 2_000;
pub const SWEEP_INTERVAL_MS: u64 = 500;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    pub quiet_window_ms: u64,
    pub stall_threshold_ms: u64,
    pub sweep_interval_ms: u64,
    /// Global guard used when the caller does not pass its own timeout.
    pub default_timeout_ms: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            quiet_window_ms: QUIET_WINDOW_MS,
            stall_threshold_ms: STALL_THRESHOLD_MS,
            sweep_interval_ms: SWEEP_INTERVAL_MS,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl SettleConfig {
    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_window_ms)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn timeout_or_default(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or_else(|| Duration::from_millis(self.default_timeout_ms))
    }
}
