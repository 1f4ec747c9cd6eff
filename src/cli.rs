// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `pipefleet`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pipefleet",
    version,
    about = "Run data pipelines on a batch scheduler, reusing earlier results.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, global = true, value_name = "PATH", default_value = "Pipefleet.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PIPEFLEET_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a pipeline on the given input files and wait until it finishes.
    Run {
        /// Pipeline name from the config's `[pipeline.<name>]` tables.
        #[arg(long, value_name = "NAME")]
        pipeline: String,

        /// Input files, in the pipeline's input order.
        #[arg(long = "input", value_name = "PATH")]
        inputs: Vec<PathBuf>,

        /// User the run belongs to. Defaults to `$USER`.
        #[arg(long)]
        user: Option<String>,

        #[arg(long, default_value_t = 0)]
        priority: u32,
    },

    /// Parse + validate the config and print the pipeline library.
    Check,

    /// Scheduler job entry points.
    Worker {
        #[arg(value_enum)]
        phase: WorkerPhaseArg,

        /// Task descriptor written by the Foreman.
        descriptor: PathBuf,
    },
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum WorkerPhaseArg {
    Setup,
    Bookkeeping,
    Cable,
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
