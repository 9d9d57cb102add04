// src/supervisor/listener.rs

//! Per-attempt output listener.
//!
//! One background task per started worker:
//! - stdout lines are scanned for the handshake; the first valid one
//!   publishes the worker as running and resolves the attempt;
//! - stderr lines are buffered on the pending entry for diagnostics;
//! - closing the owning target destroys the worker;
//! - on exit the key is vacated. A worker that never completed its
//!   handshake resolves its attempt as failed.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::handshake::{looks_like_handshake, parse_handshake_line};
use crate::launch::{LaunchedProcess, OutputLines, ProcessHandle};
use crate::registry::{FailedAttempt, Removed, Resolution};
use crate::types::Key;

use super::{Parameters, Shared};

pub(crate) fn spawn<P, C>(
    shared: Arc<Shared<P, C>>,
    key: Key<P>,
    attempt: u64,
    launched: LaunchedProcess,
) where
    P: Parameters,
    C: Send + Sync + 'static,
{
    let LaunchedProcess {
        handle,
        stdout,
        stderr,
    } = launched;

    let listener = AttemptListener {
        shared,
        key,
        attempt,
        handle,
    };
    tokio::spawn(listener.run(stdout, stderr));
}

struct AttemptListener<P, C> {
    shared: Arc<Shared<P, C>>,
    key: Key<P>,
    attempt: u64,
    handle: Arc<dyn ProcessHandle>,
}

impl<P, C> AttemptListener<P, C>
where
    P: Parameters,
    C: Send + Sync + 'static,
{
    async fn run(self, mut stdout: OutputLines, mut stderr: OutputLines) {
        let handle = Arc::clone(&self.handle);
        let exit = handle.wait_for_exit();
        tokio::pin!(exit);

        let owner_closed = self.key.target.closed_token();
        let mut owner_gone = false;
        let mut stdout_open = true;
        let mut stderr_open = true;

        // Lines already emitted are handled before the exit they precede.
        let code = loop {
            tokio::select! {
                biased;

                _ = owner_closed.cancelled(), if !owner_gone => {
                    owner_gone = true;
                    info!(
                        key = ?self.key,
                        pid = ?self.handle.pid(),
                        "owner closed; tearing worker down"
                    );
                    self.handle.destroy();
                }

                line = stdout.recv(), if stdout_open => match line {
                    Some(line) => self.on_stdout(&line),
                    None => stdout_open = false,
                },

                line = stderr.recv(), if stderr_open => match line {
                    Some(line) => self.on_stderr(&line),
                    None => stderr_open = false,
                },

                code = &mut exit => break code,
            }
        };

        self.drain(&mut stdout, stdout_open, &mut stderr, stderr_open)
            .await;
        self.on_exit(code);
    }

    /// Collect output still buffered after the exit, so late stderr makes
    /// it into the failure message. Bounded by `drain_grace`.
    async fn drain(
        &self,
        stdout: &mut OutputLines,
        mut stdout_open: bool,
        stderr: &mut OutputLines,
        mut stderr_open: bool,
    ) {
        let deadline = sleep(self.shared.config.drain_grace);
        tokio::pin!(deadline);

        while stdout_open || stderr_open {
            tokio::select! {
                _ = &mut deadline => {
                    debug!(key = ?self.key, "worker output still open after exit; not waiting");
                    break;
                }

                line = stdout.recv(), if stdout_open => match line {
                    // Too late for a handshake; the process is gone.
                    Some(line) => debug!(key = ?self.key, "stdout: {}", line),
                    None => stdout_open = false,
                },

                line = stderr.recv(), if stderr_open => match line {
                    Some(line) => self.on_stderr(&line),
                    None => stderr_open = false,
                },
            }
        }
    }

    fn on_stdout(&self, line: &str) {
        debug!(key = ?self.key, "stdout: {}", line);

        let Some(handshake) = parse_handshake_line(line) else {
            if looks_like_handshake(line) {
                warn!(key = ?self.key, line, "ignoring malformed handshake line");
            }
            return;
        };

        let published = self.shared.registry.publish_running(
            &self.key,
            self.attempt,
            &self.handle,
            handshake.port,
            &handshake.name,
        );

        match published {
            Some((identity, slot)) => {
                info!(
                    key = ?self.key,
                    attempt = self.attempt,
                    pid = ?self.handle.pid(),
                    port = handshake.port,
                    worker = %handshake.name,
                    "worker ready"
                );
                self.shared.notify_changed();
                slot.fulfil(Resolution::Running(identity));
                self.shared.arm_watchdog(handshake.port);
            }
            None => debug!(
                key = ?self.key,
                port = handshake.port,
                "ignoring handshake for an attempt that is no longer pending"
            ),
        }
    }

    fn on_stderr(&self, line: &str) {
        debug!(key = ?self.key, "stderr: {}", line);
        self.shared
            .registry
            .append_stderr(&self.key, self.attempt, line);
    }

    fn on_exit(&self, code: Option<i32>) {
        match self.shared.registry.remove_terminated(&self.key, &self.handle) {
            Some(Removed::Pending(pending)) => {
                warn!(
                    key = ?self.key,
                    attempt = self.attempt,
                    exit_code = ?code,
                    "worker exited before announcing its port"
                );
                let failed = FailedAttempt {
                    stderr: pending.stderr,
                    cause: Some(describe_exit(code)),
                };
                self.shared.notify_changed();
                pending.slot.fulfil(Resolution::Failed(failed));
            }
            Some(Removed::Running) => {
                info!(
                    key = ?self.key,
                    attempt = self.attempt,
                    exit_code = ?code,
                    "worker exited; entry removed"
                );
                self.shared.notify_changed();
            }
            None => debug!(
                key = ?self.key,
                attempt = self.attempt,
                "worker exited; entry already gone"
            ),
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("worker process exited with code {code} before announcing its port"),
        None => "worker process terminated before announcing its port".to_string(),
    }
}
