// src/launch/mod.rs

//! Process launching boundary.
//!
//! The supervisor never spawns processes itself. It asks a
//! [`ProcessLauncher`] for a [`LaunchedProcess`]: a shared [`ProcessHandle`]
//! plus the worker's stdout and stderr as streams of lines.
//!
//! - [`command`] provides [`CommandLauncher`], the production launcher built
//!   on `tokio::process`.
//! - Tests provide their own launcher that replays scripted output.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::types::Target;

pub mod command;

pub use command::{ChildHandle, CommandLauncher, WorkerSpec};

/// Boxed, `Send` future used at the trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Decoded output lines of one stream; closes when the stream ends.
pub type OutputLines = mpsc::Receiver<String>;

/// Control surface of a running worker process.
///
/// Handles are shared (`Arc<dyn ProcessHandle>`) and compared by pointer
/// identity, see [`same_handle`].
pub trait ProcessHandle: Send + Sync + fmt::Debug {
    /// OS process id, if there is one.
    fn pid(&self) -> Option<u32>;

    /// Request termination. Returns immediately; idempotent.
    fn destroy(&self);

    /// Termination was requested but the process has not exited yet.
    fn is_terminating(&self) -> bool;

    fn is_terminated(&self) -> bool;

    /// Resolve once the process has exited, with its exit code if known.
    ///
    /// May be awaited any number of times, concurrently.
    fn wait_for_exit(&self) -> BoxFuture<'_, Option<i32>>;

    /// Terminating or already gone: not safe to hand out to new callers.
    fn is_dying(&self) -> bool {
        self.is_terminating() || self.is_terminated()
    }
}

/// Pointer identity of two shared handles.
pub fn same_handle(a: &Arc<dyn ProcessHandle>, b: &Arc<dyn ProcessHandle>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// A freshly spawned worker.
pub struct LaunchedProcess {
    pub handle: Arc<dyn ProcessHandle>,
    pub stdout: OutputLines,
    pub stderr: OutputLines,
}

impl fmt::Debug for LaunchedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchedProcess")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Spawns workers for a (target, parameters) pair.
///
/// `start` is synchronous: an `Err` means no process exists and is reported
/// to the callers as a launch failure.
pub trait ProcessLauncher<P>: Send + Sync {
    fn start(&self, target: &Target, params: &P) -> anyhow::Result<LaunchedProcess>;
}
