// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::launch::WorkerSpec;
use crate::supervisor::SupervisorConfig;
use crate::supervisor::config::{DEFAULT_DRAIN_GRACE, DEFAULT_HOST, DEFAULT_POLL_INTERVAL};

/// Configuration as read from TOML, before validation.
///
/// ```toml
/// [supervisor]
/// poll_interval_ms = 1000
/// host = "127.0.0.1"
///
/// [watchdog]
/// ping_interval_ms = 5000
///
/// [worker.indexer]
/// cmd = "python3"
/// args = ["indexer.py"]
/// ```
///
/// All sections except `[worker.<name>]` are optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub supervisor: SupervisorSection,

    #[serde(default)]
    pub watchdog: WatchdogSection,

    /// Keys are worker names as used by `--worker`.
    #[serde(default)]
    pub worker: BTreeMap<String, WorkerSpec>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub supervisor: SupervisorSection,
    pub watchdog: WatchdogSection,
    pub worker: BTreeMap<String, WorkerSpec>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        supervisor: SupervisorSection,
        watchdog: WatchdogSection,
        worker: BTreeMap<String, WorkerSpec>,
    ) -> Self {
        Self {
            supervisor,
            watchdog,
            worker,
        }
    }
}

/// `[supervisor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_drain_grace_ms() -> u64 {
    DEFAULT_DRAIN_GRACE.as_millis() as u64
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            host: default_host(),
            drain_grace_ms: default_drain_grace_ms(),
        }
    }
}

impl SupervisorSection {
    pub fn to_supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::default()
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_host(self.host.clone())
            .with_drain_grace(Duration::from_millis(self.drain_grace_ms))
    }
}

/// `[watchdog]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogSection {
    #[serde(default = "default_watchdog_enabled")]
    pub enabled: bool,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
}

fn default_watchdog_enabled() -> bool {
    true
}

fn default_ping_interval_ms() -> u64 {
    5_000
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            enabled: default_watchdog_enabled(),
            ping_interval_ms: default_ping_interval_ms(),
        }
    }
}

impl WatchdogSection {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}
