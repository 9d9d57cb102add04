// src/registry/info.rs

//! Lifecycle records stored per key, and what an attempt resolves to.

use std::fmt;
use std::sync::Arc;

use crate::launch::ProcessHandle;

use super::slot::ResultSlot;

/// Per-key lifecycle state held by the registry (internal).
pub(crate) enum Info<C> {
    /// A start is in flight.
    Pending(PendingInfo),
    /// The worker announced its port and is reachable.
    Running(RunningInfo<C>),
}

impl<C> Info<C> {
    pub(crate) fn attempt(&self) -> u64 {
        match self {
            Info::Pending(p) => p.attempt,
            Info::Running(r) => r.attempt,
        }
    }

    pub(crate) fn handle(&self) -> Option<&Arc<dyn ProcessHandle>> {
        match self {
            Info::Pending(p) => p.handle.as_ref(),
            Info::Running(r) => Some(&r.identity.handle),
        }
    }
}

/// Stderr kept per pending attempt; older output is dropped first.
pub const STDERR_TAIL_BYTES: usize = 16 * 1024;

pub(crate) struct PendingInfo {
    pub attempt: u64,
    /// Resolved exactly once, by whoever settles this attempt.
    pub slot: Arc<ResultSlot>,
    /// Stderr seen before the handshake, for the failure message.
    pub stderr: String,
    /// Set as soon as the launcher returns.
    pub handle: Option<Arc<dyn ProcessHandle>>,
}

impl PendingInfo {
    /// Append one line, keeping only the last [`STDERR_TAIL_BYTES`].
    pub(crate) fn push_stderr(&mut self, line: &str) {
        self.stderr.push_str(line);
        self.stderr.push('\n');

        if self.stderr.len() > STDERR_TAIL_BYTES {
            let mut cut = self.stderr.len() - STDERR_TAIL_BYTES;
            while !self.stderr.is_char_boundary(cut) {
                cut += 1;
            }
            self.stderr.drain(..cut);
        }
    }
}

pub(crate) struct RunningInfo<C> {
    pub attempt: u64,
    pub identity: WorkerIdentity,
    /// Strong reference to the first resolved capability. Keeps it alive
    /// while cached here; dropped together with the entry.
    pub capability: Option<Arc<C>>,
}

/// Who a running worker is and where to reach it.
#[derive(Clone)]
pub struct WorkerIdentity {
    pub handle: Arc<dyn ProcessHandle>,
    pub port: u16,
    pub name: String,
}

impl fmt::Debug for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerIdentity")
            .field("pid", &self.handle.pid())
            .field("port", &self.port)
            .field("name", &self.name)
            .finish()
    }
}

/// An attempt that died before its handshake. Never stored in the registry.
#[derive(Debug, Clone, Default)]
pub struct FailedAttempt {
    pub stderr: String,
    pub cause: Option<String>,
}

impl FailedAttempt {
    pub fn launch_error(err: &anyhow::Error) -> Self {
        Self {
            stderr: String::new(),
            cause: Some(format!("{err:#}")),
        }
    }

    /// Most specific diagnostic available: stderr first, then the cause.
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim_end();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        self.cause
            .clone()
            .unwrap_or_else(|| "worker exited before announcing its port".to_string())
    }
}

/// Outcome of one start attempt.
#[derive(Debug, Clone)]
pub enum Resolution {
    Running(WorkerIdentity),
    Failed(FailedAttempt),
}

/// Public, read-only view of a key's registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Pending,
    Running { port: u16, name: String },
}

impl WorkerState {
    pub(crate) fn of<C>(info: &Info<C>) -> Self {
        match info {
            Info::Pending(_) => WorkerState::Pending,
            Info::Running(r) => WorkerState::Running {
                port: r.identity.port,
                name: r.identity.name.clone(),
            },
        }
    }
}
