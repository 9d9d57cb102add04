// src/registry/slot.rs

//! Per-attempt result slot.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{Result, SupervisorError};

use super::info::Resolution;

/// Write-once handoff of one attempt's [`Resolution`].
///
/// Has its own lock, narrower than the registry's. Code holding the
/// registry lock never touches a slot; slots are filled after the registry
/// lock is released.
#[derive(Debug, Default)]
pub struct ResultSlot {
    resolution: Mutex<Option<Resolution>>,
    resolved: Notify,
}

impl ResultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Resolution>> {
        self.resolution.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the resolution. Only the first call wins; returns whether this
    /// one did.
    pub fn fulfil(&self, resolution: Resolution) -> bool {
        {
            let mut slot = self.lock();
            if slot.is_some() {
                debug!(?resolution, "result slot already fulfilled; ignoring");
                return false;
            }
            *slot = Some(resolution);
        }
        self.resolved.notify_waiters();
        true
    }

    pub fn peek(&self) -> Option<Resolution> {
        self.lock().clone()
    }

    /// Wait for the resolution in bounded steps of `poll`, checking `cancel`
    /// between steps.
    pub async fn wait(&self, poll: Duration, cancel: &CancellationToken) -> Result<Resolution> {
        loop {
            let notified = self.resolved.notified();
            tokio::pin!(notified);
            // Register before checking, so a fulfil in between still wakes us.
            notified.as_mut().enable();

            if let Some(resolution) = self.peek() {
                return Ok(resolution);
            }
            if cancel.is_cancelled() {
                return Err(SupervisorError::Cancelled);
            }

            let _ = timeout(poll, notified).await;
        }
    }
}
