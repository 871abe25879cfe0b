// src/exec/mod.rs

//! Process execution layer.
//!
//! This module runs the grading entry point against a snapshot using
//! `tokio::process::Command` and reports a structured [`RunResult`].
//!
//! - [`backend`] provides the `GradingRunner` trait that the pipeline talks
//!   to, which tests can replace with a scripted implementation.
//! - [`process_runner`] is the production runner: process-group isolation,
//!   rlimits, deadline enforcement and forced termination.
//! - [`output`] drains stdout/stderr into size-bounded buffers.

pub mod backend;
pub mod output;
pub mod process_runner;

pub use backend::{ExitState, GradingRunner, InfrastructureError, RunResult};
pub use process_runner::ProcessRunner;
