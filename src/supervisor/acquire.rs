// src/supervisor/acquire.rs

//! Singleflight acquisition.
//!
//! For one key, a caller loops on the registry:
//! - key vacant: install a `Pending` entry, launch the worker and wait on
//!   the attempt's result slot (the caller is the *starter*);
//! - healthy `Pending`: wait on that attempt's slot, so every caller of a
//!   failed attempt sees the failure instead of starting another process;
//! - usable `Running`: reuse it, including its cached capability;
//! - entry whose process is dying: wait up to one poll interval for the
//!   next registry change, then look again.
//!
//! Every wait is bounded by `poll_interval` and followed by a check of the
//! caller's cancellation token.

use std::sync::Arc;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::errors::{Result, SupervisorError};
use crate::registry::{FailedAttempt, Inspection, Resolution, ResultSlot, WorkerIdentity};
use crate::types::{Key, Target};

use super::{Parameters, ProcessSupervisor, listener};

/// What the registry loop produced for a caller.
enum Claim<C> {
    /// Running worker with an already resolved capability.
    Cached(Arc<C>),
    /// Running worker that still needs a lookup.
    Identity(WorkerIdentity),
}

impl<P, C> ProcessSupervisor<P, C>
where
    P: Parameters,
    C: Send + Sync + 'static,
{
    /// Obtain the capability of the worker for `(target, params)`, starting
    /// the worker if none is live.
    ///
    /// Concurrent calls for the same key share a single start. Blocks until
    /// the worker is ready, the start fails, or `cancel` fires (checked once
    /// per poll interval).
    ///
    /// # Errors
    /// - [`SupervisorError::StartFailed`] if the launch failed or the worker
    ///   died before its handshake; the message is its stderr when non-empty.
    /// - [`SupervisorError::Lookup`] if the worker is up but the lookup
    ///   failed. The worker stays registered.
    /// - [`SupervisorError::Cancelled`].
    /// - [`SupervisorError::TargetClosed`] if `target` was closed.
    pub async fn acquire(
        &self,
        target: &Target,
        params: Arc<P>,
        cancel: &CancellationToken,
    ) -> Result<Arc<C>> {
        let key = Key::new(target.clone(), params);

        loop {
            let identity = match self.claim(&key, cancel).await? {
                Claim::Cached(capability) => {
                    trace!(key = ?key, "reusing cached capability");
                    return Ok(capability);
                }
                Claim::Identity(identity) => identity,
            };

            // Never hand out a worker that is already going away.
            if identity.handle.is_dying() {
                debug!(key = ?key, "worker is dying; waiting for its entry to clear");
                continue;
            }

            return self.resolve_capability(&key, identity).await;
        }
    }

    async fn claim(&self, key: &Key<P>, cancel: &CancellationToken) -> Result<Claim<C>> {
        let shared = &self.inner;
        let poll = shared.config.poll_interval;

        loop {
            if cancel.is_cancelled() {
                return Err(SupervisorError::Cancelled);
            }
            if key.target.is_closed() {
                debug!(key = ?key, "owner closed; not starting a worker");
                return Err(SupervisorError::TargetClosed(key.target.to_string()));
            }

            let slot = match shared.registry.inspect(key) {
                Inspection::Claimed { attempt, slot } => {
                    self.start_attempt(key, attempt, &slot);
                    slot
                }
                Inspection::Pending { slot } => {
                    debug!(key = ?key, "joining in-flight start");
                    slot
                }
                Inspection::Running {
                    capability: Some(capability),
                    ..
                } => return Ok(Claim::Cached(capability)),
                Inspection::Running {
                    identity,
                    capability: None,
                } => return Ok(Claim::Identity(identity)),
                Inspection::Busy(changed) => {
                    trace!(key = ?key, "entry busy; waiting for a registry change");
                    let _ = timeout(poll, changed).await;
                    continue;
                }
            };

            return match slot.wait(poll, cancel).await? {
                Resolution::Running(identity) => Ok(Claim::Identity(identity)),
                Resolution::Failed(failed) => {
                    Err(SupervisorError::StartFailed(failed.message()))
                }
            };
        }
    }

    /// Launch the worker for a freshly claimed key and attach its listener.
    ///
    /// A synchronous launch error resolves the attempt right here, through
    /// the same slot an asynchronous failure would use.
    fn start_attempt(&self, key: &Key<P>, attempt: u64, slot: &Arc<ResultSlot>) {
        let shared = &self.inner;
        shared.notify_changed();
        info!(key = ?key, attempt, "starting worker");

        match shared.launcher.start(&key.target, &key.params) {
            Ok(launched) => {
                shared.registry.attach_handle(key, attempt, &launched.handle);
                listener::spawn(Arc::clone(shared), key.clone(), attempt, launched);
            }
            Err(err) => {
                warn!(
                    key = ?key,
                    attempt,
                    error = %format!("{err:#}"),
                    "worker launch failed"
                );
                if shared.registry.remove_attempt(key, attempt).is_some() {
                    shared.notify_changed();
                }
                slot.fulfil(Resolution::Failed(FailedAttempt::launch_error(&err)));
            }
        }
    }

    async fn resolve_capability(&self, key: &Key<P>, identity: WorkerIdentity) -> Result<Arc<C>> {
        let shared = &self.inner;
        let capability = shared
            .lookup
            .resolve(&shared.config.host, identity.port, &identity.name)
            .await
            .map_err(|err| {
                warn!(
                    key = ?key,
                    port = identity.port,
                    name = %identity.name,
                    error = %format!("{err:#}"),
                    "capability lookup failed"
                );
                SupervisorError::Lookup(err)
            })?;

        Ok(shared
            .registry
            .cache_capability(key, &identity.handle, Arc::new(capability)))
    }
}
