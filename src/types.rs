// src/types.rs

//! Owner and key types shared by the registry and the supervisor.
//!
//! Equality rules differ per component on purpose:
//! - a [`Target`] is equal only to itself (pointer identity), never to a
//!   structurally identical owner;
//! - the parameters half of a [`Key`] compares structurally, so two equal
//!   configurations from the same owner collapse onto one worker;
//! - release and listing filters compare parameters by `Arc` identity
//!   (see [`Key::matches`]).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

struct TargetInner {
    id: u64,
    label: String,
    closed: CancellationToken,
}

/// Owner on whose behalf workers are started (a session, a workspace, ...).
///
/// Cloning is cheap and clones refer to the same owner.
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetInner>,
}

impl Target {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
                label: label.into(),
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Close the owner session.
    ///
    /// Every worker started for this target is torn down by its listener.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.inner.closed.clone()
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Target {}

impl Hash for Target {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // ids are unique per allocation, so this agrees with `eq`.
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .finish()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.inner.label, self.inner.id)
    }
}

/// Registry key: one worker slot per (owner, configuration).
pub struct Key<P> {
    pub target: Target,
    pub params: Arc<P>,
}

impl<P> Key<P> {
    pub fn new(target: Target, params: Arc<P>) -> Self {
        Self { target, params }
    }

    /// Identity match used by release: same target, and the very same
    /// parameters allocation when one is given.
    pub fn matches(&self, target: &Target, params: Option<&Arc<P>>) -> bool {
        self.target == *target && params.is_none_or(|p| Arc::ptr_eq(p, &self.params))
    }
}

impl<P> Clone for Key<P> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            params: Arc::clone(&self.params),
        }
    }
}

impl<P: PartialEq> PartialEq for Key<P> {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target && *self.params == *other.params
    }
}

impl<P: Eq> Eq for Key<P> {}

impl<P: Hash> Hash for Key<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target.hash(state);
        self.params.hash(state);
    }
}

impl<P: fmt::Debug> fmt::Debug for Key<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.target, self.params)
    }
}
