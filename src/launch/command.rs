// src/launch/command.rs

//! Worker processes backed by `tokio::process::Command`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Notify, mpsc, watch};
use tracing::{debug, info, warn};

use super::{BoxFuture, LaunchedProcess, ProcessHandle, ProcessLauncher};
use crate::types::Target;

/// How to start one worker process. Also the `[worker.<name>]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct WorkerSpec {
    /// Program to execute (looked up on `PATH` when not a path).
    pub cmd: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables, on top of the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory; inherited when unset.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl WorkerSpec {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for WorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cmd)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Production launcher: one OS process per [`WorkerSpec`].
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    line_buffer: usize,
}

impl CommandLauncher {
    pub fn new() -> Self {
        Self { line_buffer: 256 }
    }

    /// Number of lines buffered per stream before the reader applies
    /// backpressure to the worker.
    pub fn with_line_buffer(mut self, lines: usize) -> Self {
        self.line_buffer = lines.max(1);
        self
    }
}

impl Default for CommandLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher<WorkerSpec> for CommandLauncher {
    fn start(&self, target: &Target, spec: &WorkerSpec) -> Result<LaunchedProcess> {
        info!(target = %target, cmd = %spec, "spawning worker process");

        let mut cmd = Command::new(&spec.cmd);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning worker process '{spec}'"))?;

        let stdout = child.stdout.take().context("worker stdout was not piped")?;
        let stderr = child.stderr.take().context("worker stderr was not piped")?;

        let (out_tx, out_rx) = mpsc::channel(self.line_buffer);
        let (err_tx, err_rx) = mpsc::channel(self.line_buffer);
        forward_lines(stdout, out_tx);
        forward_lines(stderr, err_tx);

        let handle = ChildHandle::spawn(child);
        debug!(target = %target, pid = ?handle.pid(), "worker process spawned");

        Ok(LaunchedProcess {
            handle,
            stdout: out_rx,
            stderr: err_rx,
        })
    }
}

/// Read lines until EOF (or until nobody listens any more).
fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

const RUNNING: u8 = 0;
const TERMINATING: u8 = 1;
const TERMINATED: u8 = 2;

/// [`ProcessHandle`] over a `tokio::process::Child`.
///
/// The child itself is owned by a background task that waits for either a
/// natural exit or a kill request from [`ProcessHandle::destroy`].
#[derive(Debug)]
pub struct ChildHandle {
    pid: Option<u32>,
    state: AtomicU8,
    kill: Notify,
    exit: watch::Receiver<Option<Option<i32>>>,
}

impl ChildHandle {
    fn spawn(mut child: Child) -> Arc<Self> {
        let (exit_tx, exit_rx) = watch::channel(None);
        let handle = Arc::new(Self {
            pid: child.id(),
            state: AtomicU8::new(RUNNING),
            kill: Notify::new(),
            exit: exit_rx,
        });

        let me = Arc::clone(&handle);
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = me.kill.notified() => {
                    info!(pid = ?me.pid, "killing worker process");
                    if let Err(e) = child.kill().await {
                        warn!(pid = ?me.pid, error = %e, "failed to kill worker process");
                    }
                    child.wait().await
                }
            };

            let code = match status {
                Ok(status) => {
                    debug!(pid = ?me.pid, ?status, "worker process exited");
                    status.code()
                }
                Err(e) => {
                    warn!(pid = ?me.pid, error = %e, "waiting for worker process failed");
                    None
                }
            };

            me.state.store(TERMINATED, Ordering::SeqCst);
            let _ = exit_tx.send(Some(code));
        });

        handle
    }
}

impl ProcessHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn destroy(&self) {
        if self
            .state
            .compare_exchange(RUNNING, TERMINATING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // A stored permit covers a kill requested before the task polls.
            self.kill.notify_one();
        }
    }

    fn is_terminating(&self) -> bool {
        self.state.load(Ordering::SeqCst) == TERMINATING
    }

    fn is_terminated(&self) -> bool {
        self.state.load(Ordering::SeqCst) == TERMINATED
    }

    fn wait_for_exit(&self) -> BoxFuture<'_, Option<i32>> {
        let mut exit = self.exit.clone();
        Box::pin(async move {
            match exit.wait_for(|code| code.is_some()).await {
                Ok(code) => {
                    let code = *code;
                    code.flatten()
                }
                // Sender gone without a value: the waiter task died.
                Err(_) => None,
            }
        })
    }
}
