// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `workervisor`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "workervisor",
    version,
    about = "Start worker processes, wait for their handshake, and keep them supervised.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Workervisor.toml")]
    pub config: String,

    /// Start only this worker. Repeat to select several; default is all.
    #[arg(long = "worker", value_name = "NAME")]
    pub workers: Vec<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WORKERVISOR_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the workers, but don't start anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
