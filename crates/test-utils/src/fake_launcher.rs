use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::sleep;
use workervisor::handshake::HANDSHAKE_PREFIX;
use workervisor::launch::{BoxFuture, LaunchedProcess, ProcessHandle, ProcessLauncher};
use workervisor::types::Target;

/// One scripted action of a fake worker.
#[derive(Debug, Clone)]
pub enum Step {
    Stdout(String),
    Stderr(String),
    Sleep(Duration),
    /// Block until the gate is notified (or the worker is destroyed).
    Await(Arc<Notify>),
    /// Exit on its own with this code.
    Exit(i32),
}

/// What the next `start` call does.
#[derive(Debug, Clone)]
pub enum Script {
    /// `start` returns this error; no process exists.
    FailLaunch(String),
    /// Replay these steps, then stay alive until destroyed.
    Run(Vec<Step>),
}

impl Script {
    pub fn handshake(port: u16, name: &str) -> Self {
        Script::Run(vec![handshake_line(port, name)])
    }
}

pub fn handshake_line(port: u16, name: &str) -> Step {
    Step::Stdout(format!("{HANDSHAKE_PREFIX}{port}/{name}"))
}

const RUNNING: u8 = 0;
const TERMINATING: u8 = 1;
const TERMINATED: u8 = 2;

/// In-memory process handle driven by a script.
#[derive(Debug)]
pub struct FakeHandle {
    pid: u32,
    state: AtomicU8,
    exit_delay: Duration,
    destroy_calls: AtomicUsize,
    kill: Notify,
    exit_tx: watch::Sender<Option<Option<i32>>>,
    exit_rx: watch::Receiver<Option<Option<i32>>>,
}

impl FakeHandle {
    fn new(pid: u32, exit_delay: Duration) -> Arc<Self> {
        let (exit_tx, exit_rx) = watch::channel(None);
        Arc::new(Self {
            pid,
            state: AtomicU8::new(RUNNING),
            exit_delay,
            destroy_calls: AtomicUsize::new(0),
            kill: Notify::new(),
            exit_tx,
            exit_rx,
        })
    }

    fn finish(&self, code: Option<i32>) {
        self.state.store(TERMINATED, Ordering::SeqCst);
        self.exit_tx.send_replace(Some(code));
    }

    /// How many times `destroy` was called, including no-op repeats.
    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }
}

impl ProcessHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn destroy(&self) {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .state
            .compare_exchange(RUNNING, TERMINATING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
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
        let mut exit = self.exit_rx.clone();
        Box::pin(async move {
            match exit.wait_for(|code| code.is_some()).await {
                Ok(code) => {
                    let code = *code;
                    code.flatten()
                }
                Err(_) => None,
            }
        })
    }
}

enum Ending {
    Exited(i32),
    Killed,
}

async fn run_script(
    steps: Vec<Step>,
    handle: Arc<FakeHandle>,
    out: mpsc::Sender<String>,
    err: mpsc::Sender<String>,
) {
    let ending = 'script: {
        for step in steps {
            match step {
                Step::Stdout(line) => {
                    let _ = out.send(line).await;
                }
                Step::Stderr(line) => {
                    let _ = err.send(line).await;
                }
                Step::Sleep(duration) => {
                    let killed = tokio::select! {
                        _ = sleep(duration) => false,
                        _ = handle.kill.notified() => true,
                    };
                    if killed {
                        break 'script Ending::Killed;
                    }
                }
                Step::Await(gate) => {
                    let killed = tokio::select! {
                        _ = gate.notified() => false,
                        _ = handle.kill.notified() => true,
                    };
                    if killed {
                        break 'script Ending::Killed;
                    }
                }
                Step::Exit(code) => break 'script Ending::Exited(code),
            }
        }
        handle.kill.notified().await;
        Ending::Killed
    };

    let code = match ending {
        Ending::Exited(code) => Some(code),
        Ending::Killed => {
            sleep(handle.exit_delay).await;
            None
        }
    };
    // Close the streams first so listeners see EOF right after the exit.
    drop(out);
    drop(err);
    handle.finish(code);
}

/// Launcher that replays [`Script`]s instead of spawning processes.
///
/// Queued scripts are used first, in order; then the default one.
#[derive(Debug)]
pub struct FakeLauncher {
    default: Script,
    queued: Mutex<VecDeque<Script>>,
    starts: Mutex<Vec<String>>,
    handles: Mutex<Vec<Arc<FakeHandle>>>,
    exit_delay: Duration,
    next_pid: AtomicU32,
}

impl FakeLauncher {
    pub fn new(default: Script) -> Self {
        Self {
            default,
            queued: Mutex::new(VecDeque::new()),
            starts: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            exit_delay: Duration::from_millis(10),
            next_pid: AtomicU32::new(1000),
        }
    }

    /// Every worker announces `port`/`name` right away.
    pub fn handshaking(port: u16, name: &str) -> Self {
        Self::new(Script::handshake(port, name))
    }

    /// Time between `destroy` and the fake process reporting its exit.
    pub fn with_exit_delay(mut self, delay: Duration) -> Self {
        self.exit_delay = delay;
        self
    }

    pub fn push_script(&self, script: Script) {
        self.queued.lock().unwrap().push_back(script);
    }

    pub fn start_count(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    /// `"<target>:<params>"` for every start, in call order.
    pub fn started(&self) -> Vec<String> {
        self.starts.lock().unwrap().clone()
    }

    /// Handles of every process started so far, in start order.
    pub fn handles(&self) -> Vec<Arc<FakeHandle>> {
        self.handles.lock().unwrap().clone()
    }
}

impl<P: Debug> ProcessLauncher<P> for FakeLauncher {
    fn start(&self, target: &Target, params: &P) -> anyhow::Result<LaunchedProcess> {
        self.starts
            .lock()
            .unwrap()
            .push(format!("{}:{:?}", target.label(), params));

        let script = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        let steps = match script {
            Script::FailLaunch(message) => return Err(anyhow!(message)),
            Script::Run(steps) => steps,
        };

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let handle = FakeHandle::new(pid, self.exit_delay);
        self.handles.lock().unwrap().push(Arc::clone(&handle));

        let (out_tx, out_rx) = mpsc::channel(64);
        let (err_tx, err_rx) = mpsc::channel(64);
        tokio::spawn(run_script(steps, Arc::clone(&handle), out_tx, err_tx));

        Ok(LaunchedProcess {
            handle,
            stdout: out_rx,
            stderr: err_rx,
        })
    }
}
