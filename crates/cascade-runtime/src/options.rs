//! Runtime configuration for an agent host.

use std::time::Duration;

/// Tunables for `AgentHost`.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Interval between watchdog ticks.
    pub watchdog_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            watchdog_interval: Duration::from_secs(1),
        }
    }
}
