// src/lookup.rs

//! Resolving a capability from a worker's announced address.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::launch::BoxFuture;

/// Turns `(host, port, name)` into a capability of type `C`.
///
/// Implementations own whatever client-side plumbing the capability needs.
/// The returned object is cached by the supervisor for as long as the
/// worker stays registered.
pub trait RemoteLookup<C>: Send + Sync {
    fn resolve<'a>(
        &'a self,
        host: &'a str,
        port: u16,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<C>>;
}

/// Capability produced by [`TcpLookup`]: a verified worker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEndpoint {
    pub addr: SocketAddr,
    pub name: String,
}

/// Lookup that checks the worker accepts TCP connections on its port.
#[derive(Debug, Clone)]
pub struct TcpLookup {
    connect_timeout: Duration,
}

impl TcpLookup {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpLookup {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl RemoteLookup<WorkerEndpoint> for TcpLookup {
    fn resolve<'a>(
        &'a self,
        host: &'a str,
        port: u16,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<WorkerEndpoint>> {
        Box::pin(async move {
            let stream = timeout(self.connect_timeout, TcpStream::connect((host, port)))
                .await
                .with_context(|| format!("connecting to {host}:{port} timed out"))?
                .with_context(|| format!("connecting to {host}:{port}"))?;
            let addr = stream.peer_addr()?;
            debug!(%addr, name, "worker endpoint resolved");

            Ok(WorkerEndpoint {
                addr,
                name: name.to_string(),
            })
        })
    }
}
