// src/supervisor/config.rs

use std::time::Duration;

/// Upper bound on a single wait before a blocked caller re-checks its state
/// and its cancellation token.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long the listener keeps reading buffered output after it has seen
/// the process exit.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(200);

pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Tunables of a [`ProcessSupervisor`](super::ProcessSupervisor).
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub poll_interval: Duration,
    /// Host used for lookups and watchdog pings of announced ports.
    pub host: String,
    pub drain_grace: Duration,
}

impl SupervisorConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_drain_grace(mut self, drain_grace: Duration) -> Self {
        self.drain_grace = drain_grace;
        self
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            host: DEFAULT_HOST.to_string(),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}
