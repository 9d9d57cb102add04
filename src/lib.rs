// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod handshake;
pub mod launch;
pub mod logging;
pub mod lookup;
pub mod observer;
pub mod registry;
pub mod supervisor;
pub mod types;
pub mod watchdog;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::errors::SupervisorError;
use crate::launch::{CommandLauncher, WorkerSpec};
use crate::lookup::{TcpLookup, WorkerEndpoint};
use crate::watchdog::{NoopWatchdog, PingWatchdog, Watchdog};

pub use crate::supervisor::{ProcessSupervisor, SupervisorBuilder, SupervisorConfig, Teardown};
pub use crate::types::{Key, Target};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the supervisor with the command launcher, TCP lookup and watchdog
/// - Ctrl-C handling and final teardown
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let selected = select_workers(&cfg, &args.workers)?;

    let watchdog: Arc<dyn Watchdog> = if cfg.watchdog.enabled {
        Arc::new(PingWatchdog::new(cfg.watchdog.ping_interval()))
    } else {
        Arc::new(NoopWatchdog)
    };

    let supervisor: ProcessSupervisor<WorkerSpec, WorkerEndpoint> = ProcessSupervisor::builder(
        Arc::new(CommandLauncher::new()),
        Arc::new(TcpLookup::default()),
    )
    .config(cfg.supervisor.to_supervisor_config())
    .watchdog(watchdog)
    .build();

    let target = Target::new("workervisor-cli");
    let shutdown = CancellationToken::new();

    // Ctrl-C → stop waiting, tear everything down.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            shutdown.cancel();
        });
    }

    for (name, spec) in selected {
        let acquired = supervisor
            .acquire(&target, Arc::new(spec), &shutdown)
            .await
            .with_context(|| format!("starting worker '{name}'"));

        match acquired {
            Ok(endpoint) => println!("{name} ready at {} ({})", endpoint.addr, endpoint.name),
            Err(err) => {
                supervisor.stop_all(true).await;
                return Err(err);
            }
        }
    }

    info!("all workers ready; press Ctrl-C to stop");
    shutdown.cancelled().await;

    let stopped = supervisor.stop_all(true).await;
    info!(stopped, "workervisor exiting");
    Ok(())
}

/// Workers named on the command line, or all of them.
fn select_workers(
    cfg: &ConfigFile,
    names: &[String],
) -> std::result::Result<BTreeMap<String, WorkerSpec>, SupervisorError> {
    if names.is_empty() {
        return Ok(cfg.worker.clone());
    }

    let mut selected = BTreeMap::new();
    for name in names {
        let spec = cfg.worker.get(name).ok_or_else(|| {
            SupervisorError::ConfigError(format!("unknown worker '{name}'"))
        })?;
        selected.insert(name.clone(), spec.clone());
    }
    Ok(selected)
}

/// Simple dry-run output: print supervisor settings and workers.
fn print_dry_run(cfg: &ConfigFile) {
    println!("workervisor dry-run");
    println!("  supervisor.host = {}", cfg.supervisor.host);
    println!(
        "  supervisor.poll_interval_ms = {}",
        cfg.supervisor.poll_interval_ms
    );
    if cfg.watchdog.enabled {
        println!("  watchdog.ping_interval_ms = {}", cfg.watchdog.ping_interval_ms);
    } else {
        println!("  watchdog disabled");
    }
    println!();

    println!("workers ({}):", cfg.worker.len());
    for (name, spec) in cfg.worker.iter() {
        println!("  - {name}");
        println!("      cmd: {spec}");
        if !spec.env.is_empty() {
            println!("      env: {:?}", spec.env);
        }
        if let Some(ref cwd) = spec.cwd {
            println!("      cwd: {}", cwd.display());
        }
    }

    debug!("dry-run complete (nothing started)");
}
