#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use workervisor::supervisor::{ProcessSupervisor, SupervisorConfig};
use workervisor_test_utils::{
    CountingLookup, CountingObserver, FakeCapability, FakeLauncher, RecordingWatchdog,
};

pub use workervisor_test_utils::{eventually, init_tracing, with_timeout};

pub type TestSupervisor = ProcessSupervisor<String, FakeCapability>;

/// A supervisor wired to fakes, plus handles to inspect them.
pub struct Harness {
    pub supervisor: TestSupervisor,
    pub launcher: Arc<FakeLauncher>,
    pub lookup: Arc<CountingLookup>,
    pub watchdog: Arc<RecordingWatchdog>,
    pub observer: Arc<CountingObserver>,
}

/// Short poll interval so waits in tests stay fast.
pub fn test_config() -> SupervisorConfig {
    SupervisorConfig::default().with_poll_interval(Duration::from_millis(50))
}

pub fn harness(launcher: FakeLauncher) -> Harness {
    harness_with(launcher, RecordingWatchdog::new(), test_config())
}

pub fn harness_with(
    launcher: FakeLauncher,
    watchdog: RecordingWatchdog,
    config: SupervisorConfig,
) -> Harness {
    let launcher = Arc::new(launcher);
    let lookup = Arc::new(CountingLookup::new());
    let watchdog = Arc::new(watchdog);
    let observer = CountingObserver::new();

    let supervisor = ProcessSupervisor::builder(launcher.clone(), lookup.clone())
        .watchdog(watchdog.clone())
        .observer(observer.observer())
        .config(config)
        .build();

    Harness {
        supervisor,
        launcher,
        lookup,
        watchdog,
        observer,
    }
}

pub fn params(value: &str) -> Arc<String> {
    Arc::new(value.to_string())
}
