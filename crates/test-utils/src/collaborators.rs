use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use workervisor::launch::BoxFuture;
use workervisor::lookup::RemoteLookup;
use workervisor::observer::StateObserver;
use workervisor::watchdog::Watchdog;

/// Capability handed out by [`CountingLookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCapability {
    pub host: String,
    pub port: u16,
    pub name: String,
    /// 1-based number of the lookup that produced it.
    pub serial: usize,
}

/// Lookup that counts calls and can be told to fail.
#[derive(Debug, Default)]
pub struct CountingLookup {
    calls: AtomicUsize,
    failures: Mutex<VecDeque<String>>,
}

impl CountingLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the next lookup fail with `message`.
    pub fn fail_next(&self, message: &str) {
        self.failures.lock().unwrap().push_back(message.to_string());
    }
}

impl RemoteLookup<FakeCapability> for CountingLookup {
    fn resolve<'a>(
        &'a self,
        host: &'a str,
        port: u16,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<FakeCapability>> {
        let serial = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let failure = self.failures.lock().unwrap().pop_front();

        Box::pin(async move {
            if let Some(message) = failure {
                return Err(anyhow!(message));
            }
            Ok(FakeCapability {
                host: host.to_string(),
                port,
                name: name.to_string(),
                serial,
            })
        })
    }
}

/// Watchdog that records what it was armed for.
#[derive(Debug, Default)]
pub struct RecordingWatchdog {
    armed: Mutex<Vec<(String, u16)>>,
    fail: AtomicBool,
}

impl RecordingWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A watchdog whose `arm` always errors (after recording the call).
    pub fn failing() -> Self {
        let watchdog = Self::default();
        watchdog.fail.store(true, Ordering::SeqCst);
        watchdog
    }

    pub fn armed(&self) -> Vec<(String, u16)> {
        self.armed.lock().unwrap().clone()
    }
}

impl Watchdog for RecordingWatchdog {
    fn arm(&self, host: &str, port: u16) -> anyhow::Result<()> {
        self.armed.lock().unwrap().push((host.to_string(), port));
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("watchdog unavailable"));
        }
        Ok(())
    }
}

/// Counts state-changed notifications.
#[derive(Debug, Default)]
pub struct CountingObserver {
    count: AtomicUsize,
}

impl CountingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Observer to hand to the supervisor builder.
    pub fn observer(self: &Arc<Self>) -> Arc<dyn StateObserver> {
        let me = Arc::clone(self);
        Arc::new(move || {
            me.count.fetch_add(1, Ordering::SeqCst);
        })
    }
}
