// src/logging.rs

//! Logging setup for `prograde` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `PROGRADE_LOG` environment variable. Either a bare level ("debug") or
//!    a full directive list ("info,prograde::exec=trace").
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that STDOUT carries only the JSON report.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

/// Environment variable consulted when no CLI level is given.
pub const LOG_ENV_VAR: &str = "PROGRADE_LOG";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(lvl) => EnvFilter::new(directive_for(lvl)),
        None => filter_from_env(std::env::var(LOG_ENV_VAR).ok().as_deref()),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("installing tracing subscriber")?;

    Ok(())
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

/// Unparsable directives fall back to `info` rather than aborting startup.
fn filter_from_env(raw: Option<&str>) -> EnvFilter {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return EnvFilter::new("info");
    };

    let normalised = match raw.to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        other => other.to_string(),
    };

    EnvFilter::try_new(&normalised).unwrap_or_else(|_| EnvFilter::new("info"))
}
