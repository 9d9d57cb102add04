// src/supervisor/mod.rs

//! Orchestration API for remote worker processes.
//!
//! [`ProcessSupervisor`] hands out capabilities for `(Target, Parameters)`
//! keys and starts at most one worker per key, however many callers ask at
//! once:
//!
//! - [`acquire`](ProcessSupervisor::acquire) claims, joins or reuses the
//!   key's entry in the [`Registry`] (see [`acquire`] for the algorithm).
//! - [`listener`] follows a started worker's output, publishes it on its
//!   handshake and vacates the key when it dies.
//! - [`release`](ProcessSupervisor::release) and
//!   [`stop_all`](ProcessSupervisor::stop_all) tear workers down through a
//!   [`Teardown`].

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

use crate::launch::ProcessLauncher;
use crate::lookup::RemoteLookup;
use crate::observer::StateObserver;
use crate::registry::{Registry, WorkerState};
use crate::types::{Key, Target};
use crate::watchdog::{NoopWatchdog, Watchdog};

pub mod acquire;
pub mod config;
pub mod listener;
pub mod teardown;

pub use config::{DEFAULT_POLL_INTERVAL, SupervisorConfig};
pub use teardown::Teardown;

/// Bounds for the configuration half of a key.
pub trait Parameters: Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> Parameters for T where T: Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// State shared between the supervisor, its listeners and its teardowns.
pub(crate) struct Shared<P, C> {
    pub(crate) registry: Registry<P, C>,
    pub(crate) launcher: Arc<dyn ProcessLauncher<P>>,
    pub(crate) lookup: Arc<dyn RemoteLookup<C>>,
    pub(crate) watchdog: Arc<dyn Watchdog>,
    pub(crate) observer: Arc<dyn StateObserver>,
    pub(crate) config: SupervisorConfig,
    /// Runtime for background work started from synchronous entry points.
    pub(crate) runtime: Option<Handle>,
}

impl<P, C> Shared<P, C> {
    pub(crate) fn notify_changed(&self) {
        self.observer.state_changed();
    }

    /// Best effort; a failure is logged and otherwise ignored.
    pub(crate) fn arm_watchdog(&self, port: u16) {
        if let Err(err) = self.watchdog.arm(&self.config.host, port) {
            warn!(
                host = %self.config.host,
                port,
                error = %format!("{err:#}"),
                "failed to arm watchdog"
            );
        }
    }
}

/// Supervisor of out-of-process workers, one per `(Target, P)` key.
///
/// `P` is the worker configuration, `C` the capability type produced by the
/// [`RemoteLookup`]. Cloning is cheap and clones share one registry.
pub struct ProcessSupervisor<P, C> {
    inner: Arc<Shared<P, C>>,
}

impl<P, C> Clone for ProcessSupervisor<P, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, C> fmt::Debug for ProcessSupervisor<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<P, C> ProcessSupervisor<P, C>
where
    P: Parameters,
    C: Send + Sync + 'static,
{
    pub fn builder(
        launcher: Arc<dyn ProcessLauncher<P>>,
        lookup: Arc<dyn RemoteLookup<C>>,
    ) -> SupervisorBuilder<P, C> {
        SupervisorBuilder {
            launcher,
            lookup,
            watchdog: Arc::new(NoopWatchdog),
            observer: Arc::new(|| trace!("registry state changed")),
            config: SupervisorConfig::default(),
            runtime: None,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Read access to the registry, for diagnostics.
    pub fn registry(&self) -> &Registry<P, C> {
        &self.inner.registry
    }

    /// Terminate the workers of `target`: all of them, or only the one keyed
    /// by this very `params` allocation.
    ///
    /// Termination is requested before returning; await the returned
    /// [`Teardown`] to wait for the processes to exit. Callable from any
    /// thread, including ones outside a tokio runtime.
    pub fn release(&self, target: &Target, params: Option<&Arc<P>>) -> Teardown {
        let victims = self
            .inner
            .registry
            .collect_live(|key| key.matches(target, params));
        debug!(target = %target, workers = victims.len(), "releasing workers");
        Teardown::spawn(victims, &self.inner.observer, self.inner.runtime.as_ref())
    }

    /// Terminate every live worker. With `wait`, return only once all of
    /// them have exited. Returns how many workers were asked to stop.
    pub async fn stop_all(&self, wait: bool) -> usize {
        let victims = self.inner.registry.collect_live(|_| true);
        let teardown =
            Teardown::spawn(victims, &self.inner.observer, self.inner.runtime.as_ref());
        let workers = teardown.len();
        if workers > 0 {
            info!(workers, wait, "stopping all workers");
        }
        if wait {
            teardown.wait().await;
        }
        workers
    }

    /// Point-in-time snapshot of the configurations registered for `target`.
    pub fn active_configurations_for(&self, target: &Target) -> Vec<Arc<P>> {
        self.inner.registry.params_for(target)
    }

    /// Point-in-time snapshot of every registered key.
    pub fn active_configurations(&self) -> Vec<(Target, Arc<P>)> {
        self.inner
            .registry
            .keys()
            .into_iter()
            .map(|key| (key.target, key.params))
            .collect()
    }

    pub fn worker_state(&self, target: &Target, params: &Arc<P>) -> Option<WorkerState> {
        let key = Key::new(target.clone(), Arc::clone(params));
        self.inner.registry.state(&key)
    }
}

/// Builder for [`ProcessSupervisor`]; obtained from
/// [`ProcessSupervisor::builder`].
pub struct SupervisorBuilder<P, C> {
    launcher: Arc<dyn ProcessLauncher<P>>,
    lookup: Arc<dyn RemoteLookup<C>>,
    watchdog: Arc<dyn Watchdog>,
    observer: Arc<dyn StateObserver>,
    config: SupervisorConfig,
    runtime: Option<Handle>,
}

impl<P, C> SupervisorBuilder<P, C>
where
    P: Parameters,
    C: Send + Sync + 'static,
{
    pub fn watchdog(mut self, watchdog: Arc<dyn Watchdog>) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn StateObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime used when `release` is called from a thread outside any
    /// runtime. Defaults to the runtime `build` is called on, if any.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> ProcessSupervisor<P, C> {
        let runtime = self.runtime.or_else(|| Handle::try_current().ok());
        ProcessSupervisor {
            inner: Arc::new(Shared {
                registry: Registry::new(),
                launcher: self.launcher,
                lookup: self.lookup,
                watchdog: self.watchdog,
                observer: self.observer,
                config: self.config,
                runtime,
            }),
        }
    }
}
