// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The worker could not be launched, or died before announcing its port.
    ///
    /// The message is the worker's stderr when it printed any, otherwise the
    /// underlying cause.
    #[error("worker failed to start: {0}")]
    StartFailed(String),

    /// The worker is reachable but its capability could not be resolved.
    #[error("remote lookup failed: {0:#}")]
    Lookup(anyhow::Error),

    /// The caller's cancellation token fired while waiting.
    #[error("acquisition cancelled")]
    Cancelled,

    /// The owner was closed; no worker is started on its behalf.
    #[error("target {0} is closed")]
    TargetClosed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SupervisorError>;
