// src/observer.rs

//! Hook for observers of registry changes (UI refresh, dependent caches).

/// Invoked after every actual state change: a new pending attempt, a pending
/// attempt becoming running, a removal, or a teardown request that found at
/// least one worker. Never for no-ops.
///
/// Called outside the registry lock, from whichever task made the change.
pub trait StateObserver: Send + Sync {
    fn state_changed(&self);
}

impl<F> StateObserver for F
where
    F: Fn() + Send + Sync,
{
    fn state_changed(&self) {
        self()
    }
}
