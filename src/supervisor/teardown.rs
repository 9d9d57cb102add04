// src/supervisor/teardown.rs

use std::fmt::Debug;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::launch::ProcessHandle;
use crate::observer::StateObserver;
use crate::types::Key;

/// A batch of workers being torn down.
///
/// Termination has already been requested when a `Teardown` exists. Await
/// [`wait`](Teardown::wait) to block until every process has exited, call
/// [`abort`](Teardown::abort) to stop waiting, or just drop it.
#[derive(Debug)]
pub struct Teardown {
    workers: usize,
    task: Option<JoinHandle<()>>,
}

impl Teardown {
    /// Request termination of every victim, then wait for the exits on
    /// `runtime`. Safe to call from threads outside any runtime.
    pub(crate) fn spawn<P: Debug>(
        victims: Vec<(Key<P>, Arc<dyn ProcessHandle>)>,
        observer: &Arc<dyn StateObserver>,
        runtime: Option<&Handle>,
    ) -> Self {
        if victims.is_empty() {
            return Self {
                workers: 0,
                task: None,
            };
        }

        for (key, handle) in &victims {
            info!(key = ?key, pid = ?handle.pid(), "terminating worker");
            handle.destroy();
        }
        observer.state_changed();

        let workers = victims.len();
        let handles: Vec<Arc<dyn ProcessHandle>> =
            victims.into_iter().map(|(_, handle)| handle).collect();

        let Some(runtime) = Handle::try_current().ok().or_else(|| runtime.cloned()) else {
            warn!(workers, "no tokio runtime available; not waiting for workers to exit");
            return Self {
                workers,
                task: None,
            };
        };

        let task = runtime.spawn(async move {
            for handle in handles {
                let code = handle.wait_for_exit().await;
                debug!(pid = ?handle.pid(), exit_code = ?code, "worker terminated");
            }
        });

        Self {
            workers,
            task: Some(task),
        }
    }

    /// Number of workers asked to terminate.
    pub fn len(&self) -> usize {
        self.workers
    }

    pub fn is_empty(&self) -> bool {
        self.workers == 0
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Stop waiting. Already requested terminations are not undone.
    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Wait until every worker of the batch has exited.
    ///
    /// Never fails: teardown is best-effort cleanup, so an unexpected error
    /// in the waiting task is logged.
    pub async fn wait(self) {
        let Some(task) = self.task else {
            return;
        };
        match task.await {
            Ok(()) => debug!(workers = self.workers, "teardown complete"),
            Err(e) if e.is_cancelled() => debug!("teardown wait aborted"),
            Err(e) => error!(error = %e, "teardown task failed"),
        }
    }
}
