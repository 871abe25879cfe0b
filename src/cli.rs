// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `prograde`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "prograde",
    version,
    about = "Fetch student repositories, run a grading script against each, and report outcomes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Prograde.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Prograde.toml")]
    pub config: String,

    /// Override `[config].concurrency` for this run.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Only grade the given student ids (repeatable).
    #[arg(long = "student", value_name = "ID")]
    pub students: Vec<String>,

    /// Write the JSON report here instead of STDOUT.
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PROGRADE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the grading plan, but don't fetch or run anything.
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
