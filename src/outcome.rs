// src/outcome.rs

//! Per-repository grading outcome.
//!
//! Exactly one [`Outcome`] is produced for every reference submitted to the
//! scheduler. Failure variants keep whatever output or diagnostics were
//! available so a human can review the case manually.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fetch::FetchError;

/// Captured stdout/stderr of a grading process, each bounded in size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stdout_truncated: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stderr_truncated: bool,
}

impl CapturedOutput {
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }

    /// Last `max_chars` characters of stderr, used for crash diagnostics.
    pub fn stderr_tail(&self, max_chars: usize) -> &str {
        let count = self.stderr.chars().count();
        if count <= max_chars {
            return &self.stderr;
        }
        let skip = count - max_chars;
        match self.stderr.char_indices().nth(skip) {
            Some((idx, _)) => &self.stderr[idx..],
            None => "",
        }
    }
}

/// Why a run did not produce a grade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    /// The grading procedure exited with a non-zero status.
    NonZeroExit { code: i32 },
    /// Exit status was zero but stdout carried no usable payload.
    UnparsableResult { detail: String },
    /// The runner could not spawn or supervise the grading process.
    Infrastructure { detail: String },
    /// The scheduler could not drive the pipeline to completion.
    Orchestration { detail: String },
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::NonZeroExit { code } => write!(f, "exited with status {code}"),
            RunFailure::UnparsableResult { detail } => write!(f, "unparsable result: {detail}"),
            RunFailure::Infrastructure { detail } => write!(f, "infrastructure error: {detail}"),
            RunFailure::Orchestration { detail } => write!(f, "orchestration error: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Graded {
        score: f64,
        feedback: String,
        /// Commit id that was graded, when the fetcher could resolve it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
    },
    FetchFailed {
        reason: FetchError,
        attempts: u32,
    },
    RunFailed {
        reason: RunFailure,
        partial_output: CapturedOutput,
    },
    TimedOut {
        partial_output: CapturedOutput,
        elapsed_ms: u64,
        /// Deadline was forced early by a global cancellation.
        cancelled: bool,
    },
    Crashed {
        signal: Option<i32>,
        exit_code: Option<i32>,
        diagnostics: String,
    },
    /// Never started because the run was cancelled first.
    Skipped {
        reason: String,
    },
}

/// Discriminant of [`Outcome`], used for report counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Graded,
    FetchFailed,
    RunFailed,
    TimedOut,
    Crashed,
    Skipped,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Graded { .. } => OutcomeKind::Graded,
            Outcome::FetchFailed { .. } => OutcomeKind::FetchFailed,
            Outcome::RunFailed { .. } => OutcomeKind::RunFailed,
            Outcome::TimedOut { .. } => OutcomeKind::TimedOut,
            Outcome::Crashed { .. } => OutcomeKind::Crashed,
            Outcome::Skipped { .. } => OutcomeKind::Skipped,
        }
    }

    pub fn is_graded(&self) -> bool {
        matches!(self, Outcome::Graded { .. })
    }

    /// Synthesized when a pipeline could not be driven to completion.
    pub fn orchestration_failure(detail: impl Into<String>) -> Self {
        Outcome::RunFailed {
            reason: RunFailure::Orchestration {
                detail: detail.into(),
            },
            partial_output: CapturedOutput::default(),
        }
    }
}
