// src/exec/backend.rs

//! Pluggable runner abstraction.
//!
//! The pipeline talks to a `GradingRunner` instead of spawning processes
//! itself. Production code uses [`super::ProcessRunner`]; tests swap in
//! scripted runners that never touch the process table.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::engine::CancelSignal;
use crate::fetch::Snapshot;
use crate::outcome::CapturedOutput;
use crate::types::{BoxFuture, GradingTask};

/// How a grading process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// Exited normally with this status code.
    Code(i32),
    /// Terminated by this signal.
    Signal(i32),
}

impl ExitState {
    pub fn success(&self) -> bool {
        matches!(self, ExitState::Code(0))
    }
}

/// Result of supervising one grading process.
///
/// Expected failure modes (non-zero exit, crash signal, deadline) are all
/// represented here rather than as errors.
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    Completed {
        status: ExitState,
        output: CapturedOutput,
        elapsed: Duration,
    },
    /// The deadline passed and the process tree was killed.
    TimedOut {
        output: CapturedOutput,
        elapsed: Duration,
        /// Deadline was shortened by a global cancellation.
        cancelled: bool,
    },
}

impl RunResult {
    pub fn output(&self) -> &CapturedOutput {
        match self {
            RunResult::Completed { output, .. } | RunResult::TimedOut { output, .. } => output,
        }
    }
}

/// The runner could not do its job at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InfrastructureError {
    #[error("cannot spawn grading process '{program}': {detail}")]
    Spawn { program: String, detail: String },

    #[error("lost track of grading process: {0}")]
    Supervise(String),
}

/// Trait abstracting how a grading task is executed against a snapshot.
pub trait GradingRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        task: &'a GradingTask,
        snapshot: &'a Snapshot,
        cancel: CancelSignal,
    ) -> BoxFuture<'a, Result<RunResult, InfrastructureError>>;
}

impl<T: GradingRunner + ?Sized> GradingRunner for Arc<T> {
    fn run<'a>(
        &'a self,
        task: &'a GradingTask,
        snapshot: &'a Snapshot,
        cancel: CancelSignal,
    ) -> BoxFuture<'a, Result<RunResult, InfrastructureError>> {
        (**self).run(task, snapshot, cancel)
    }
}
