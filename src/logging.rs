// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Filter resolution:
//! 1. `--log-level` CLI flag, applied to every target
//! 2. `PIPEFLEET_LOG`, parsed as an `EnvFilter` directive string
//!    (e.g. `"info"` or `"pipefleet::foreman=debug,info"`)
//! 3. `info`
//!
//! Everything is written to stderr. Worker subcommands run inside scheduler
//! jobs whose stderr lands in a captured log file, so colours are disabled
//! there.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

/// Environment variable consulted when no CLI level is given.
pub const LOG_ENV_VAR: &str = "PIPEFLEET_LOG";

/// Where the process is running; affects formatting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// The long-running manager or a `check` invocation on a terminal.
    Interactive,
    /// A worker subcommand inside a scheduler job.
    Worker,
}

/// Initialise the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>, mode: LogMode) -> Result<()> {
    let filter = resolve_filter(cli_level);

    fmt()
        .with_env_filter(filter)
        .with_target(mode == LogMode::Interactive)
        .with_ansi(mode == LogMode::Interactive)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))?;

    Ok(())
}

fn resolve_filter(cli_level: Option<LogLevel>) -> EnvFilter {
    if let Some(lvl) = cli_level {
        return EnvFilter::new(directive_for(lvl));
    }

    std::env::var(LOG_ENV_VAR)
        .ok()
        .and_then(|s| EnvFilter::try_new(s.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn directive_for(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
