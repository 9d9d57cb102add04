// src/registry/mod.rs

//! Single source of truth for worker lifecycle state.
//!
//! The registry maps each [`Key`] to its current [`Info`] inside one mutex,
//! and announces every mutation on one broadcast [`Notify`]. Waiters
//! register interest while still holding the lock, so a change published
//! under the lock can never be missed, and re-check their own predicate on
//! every wake (spurious wakeups are expected).
//!
//! The mutex is never held across an `.await`, and code holding it never
//! locks a [`ResultSlot`]. Lock order is registry, then slot.
//!
//! Invariant: at most one `Pending` or `Running` entry per key.

use std::collections::HashMap;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use crate::launch::{ProcessHandle, same_handle};
use crate::types::{Key, Target};

pub mod info;
pub mod slot;

pub(crate) use info::{Info, PendingInfo, RunningInfo};
pub use info::{FailedAttempt, Resolution, STDERR_TAIL_BYTES, WorkerIdentity, WorkerState};
pub use slot::ResultSlot;

/// What a caller found when it looked up its key.
pub(crate) enum Inspection<'a, C> {
    /// The key was vacant. A `Pending` entry now exists and the caller owns
    /// the start.
    Claimed { attempt: u64, slot: Arc<ResultSlot> },
    /// A healthy start is in flight; its slot tells how it ends.
    Pending { slot: Arc<ResultSlot> },
    /// A usable worker, plus its cached capability if one was resolved.
    Running {
        identity: WorkerIdentity,
        capability: Option<Arc<C>>,
    },
    /// The entry's process is dying. Wait for the next change and look again.
    Busy(Pin<Box<Notified<'a>>>),
}

/// What a termination removed.
pub(crate) enum Removed {
    Pending(PendingInfo),
    Running,
}

pub struct Registry<P, C> {
    entries: Mutex<HashMap<Key<P>, Info<C>>>,
    changed: Notify,
    next_attempt: AtomicU64,
}

impl<P, C> Default for Registry<P, C> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            changed: Notify::new(),
            next_attempt: AtomicU64::new(1),
        }
    }
}

impl<P: Eq + Hash, C> Registry<P, C> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key<P>, Info<C>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn inspect(&self, key: &Key<P>) -> Inspection<'_, C> {
        let mut entries = self.lock();

        match entries.get(key) {
            None => {
                let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                let slot = Arc::new(ResultSlot::new());
                entries.insert(
                    key.clone(),
                    Info::Pending(PendingInfo {
                        attempt,
                        slot: Arc::clone(&slot),
                        stderr: String::new(),
                        handle: None,
                    }),
                );
                self.changed.notify_waiters();
                Inspection::Claimed { attempt, slot }
            }
            Some(Info::Running(running)) if !running.identity.handle.is_dying() => {
                Inspection::Running {
                    identity: running.identity.clone(),
                    capability: running.capability.clone(),
                }
            }
            Some(Info::Pending(pending))
                if !pending.handle.as_ref().is_some_and(|h| h.is_dying()) =>
            {
                Inspection::Pending {
                    slot: Arc::clone(&pending.slot),
                }
            }
            Some(_) => {
                let mut notified = Box::pin(self.changed.notified());
                notified.as_mut().enable();
                Inspection::Busy(notified)
            }
        }
    }

    /// Record the launcher's handle on a still-pending attempt.
    pub(crate) fn attach_handle(
        &self,
        key: &Key<P>,
        attempt: u64,
        handle: &Arc<dyn ProcessHandle>,
    ) -> bool {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(Info::Pending(pending)) if pending.attempt == attempt => {
                pending.handle = Some(Arc::clone(handle));
                true
            }
            _ => false,
        }
    }

    /// Append one stderr line to a pending attempt's diagnostics buffer.
    pub(crate) fn append_stderr(&self, key: &Key<P>, attempt: u64, line: &str) {
        let mut entries = self.lock();
        if let Some(Info::Pending(pending)) = entries.get_mut(key) {
            if pending.attempt == attempt {
                pending.push_stderr(line);
            }
        }
    }

    /// Replace a pending attempt with its running worker and wake every
    /// waiter. Returns the identity and the slot to fulfil, or `None` if the
    /// attempt is no longer pending (duplicate handshake, already removed).
    pub(crate) fn publish_running(
        &self,
        key: &Key<P>,
        attempt: u64,
        handle: &Arc<dyn ProcessHandle>,
        port: u16,
        name: &str,
    ) -> Option<(WorkerIdentity, Arc<ResultSlot>)> {
        let mut entries = self.lock();
        let slot = match entries.get(key) {
            Some(Info::Pending(pending)) if pending.attempt == attempt => {
                Arc::clone(&pending.slot)
            }
            _ => return None,
        };

        let identity = WorkerIdentity {
            handle: Arc::clone(handle),
            port,
            name: name.to_string(),
        };
        entries.insert(
            key.clone(),
            Info::Running(RunningInfo {
                attempt,
                identity: identity.clone(),
                capability: None,
            }),
        );
        self.changed.notify_waiters();

        Some((identity, slot))
    }

    /// Vacate a key whose launch failed before any process existed.
    pub(crate) fn remove_attempt(&self, key: &Key<P>, attempt: u64) -> Option<PendingInfo> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(Info::Pending(pending)) if pending.attempt == attempt => {}
            _ => return None,
        }
        let removed = match entries.remove(key) {
            Some(Info::Pending(pending)) => Some(pending),
            _ => None,
        };
        self.changed.notify_waiters();
        removed
    }

    /// Vacate a key because `handle` terminated. Entries owned by another
    /// handle are left alone.
    pub(crate) fn remove_terminated(
        &self,
        key: &Key<P>,
        handle: &Arc<dyn ProcessHandle>,
    ) -> Option<Removed> {
        let mut entries = self.lock();
        let owned = entries
            .get(key)
            .and_then(|info| info.handle())
            .is_some_and(|h| same_handle(h, handle));
        if !owned {
            return None;
        }

        let removed = match entries.remove(key)? {
            Info::Pending(pending) => Removed::Pending(pending),
            // Dropping the entry drops the cached capability with it.
            Info::Running(_) => Removed::Running,
        };
        self.changed.notify_waiters();
        Some(removed)
    }

    /// Cache `capability` as the hard reference of the running entry owned
    /// by `handle`. If one is already cached, that one is returned instead.
    pub(crate) fn cache_capability(
        &self,
        key: &Key<P>,
        handle: &Arc<dyn ProcessHandle>,
        capability: Arc<C>,
    ) -> Arc<C> {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(Info::Running(running)) if same_handle(&running.identity.handle, handle) => {
                Arc::clone(running.capability.get_or_insert(capability))
            }
            _ => capability,
        }
    }

    /// Handles of matching entries whose process is neither terminating nor
    /// terminated.
    pub(crate) fn collect_live<F>(&self, filter: F) -> Vec<(Key<P>, Arc<dyn ProcessHandle>)>
    where
        F: Fn(&Key<P>) -> bool,
    {
        let entries = self.lock();
        entries
            .iter()
            .filter(|(key, _)| filter(key))
            .filter_map(|(key, info)| {
                let handle = info.handle()?;
                (!handle.is_dying()).then(|| (key.clone(), Arc::clone(handle)))
            })
            .collect()
    }

    /// Snapshot of every registered key.
    pub fn keys(&self) -> Vec<Key<P>> {
        self.lock().keys().cloned().collect()
    }

    /// Snapshot of the parameters registered for `target` (by identity).
    pub fn params_for(&self, target: &Target) -> Vec<Arc<P>> {
        self.lock()
            .keys()
            .filter(|key| key.target == *target)
            .map(|key| Arc::clone(&key.params))
            .collect()
    }

    pub fn state(&self, key: &Key<P>) -> Option<WorkerState> {
        self.lock().get(key).map(WorkerState::of)
    }

    /// Attempt id of the entry currently registered for `key`.
    pub fn attempt(&self, key: &Key<P>) -> Option<u64> {
        self.lock().get(key).map(Info::attempt)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
