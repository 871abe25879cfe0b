// src/pipeline/state.rs

//! Per-invocation pipeline state machine.
//!
//! ```text
//! Start -> Fetching -> CheckedOut -> Running -> {Graded, RunFailed, TimedOut, Crashed}
//! Fetching -> FetchFailed
//! {Fetching, CheckedOut} -> Skipped   (run cancelled before the grader started)
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::outcome::Outcome;
use crate::types::RepositoryReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Start,
    Fetching,
    CheckedOut,
    Running,
    Graded,
    RunFailed,
    TimedOut,
    Crashed,
    FetchFailed,
    Skipped,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Graded
                | PipelineState::RunFailed
                | PipelineState::TimedOut
                | PipelineState::Crashed
                | PipelineState::FetchFailed
                | PipelineState::Skipped
        )
    }

    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Start, Fetching)
                | (Fetching, CheckedOut)
                | (Fetching, FetchFailed)
                | (Fetching, Skipped)
                | (CheckedOut, Running)
                | (CheckedOut, Skipped)
                | (Running, Graded)
                | (Running, RunFailed)
                | (Running, TimedOut)
                | (Running, Crashed)
        )
    }

    /// Terminal state reached after `Running` for the given outcome.
    pub fn after_run(outcome: &Outcome) -> PipelineState {
        match outcome {
            Outcome::Graded { .. } => PipelineState::Graded,
            Outcome::TimedOut { .. } => PipelineState::TimedOut,
            Outcome::Crashed { .. } => PipelineState::Crashed,
            Outcome::FetchFailed { .. } => PipelineState::FetchFailed,
            Outcome::RunFailed { .. } | Outcome::Skipped { .. } => PipelineState::RunFailed,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Start => "START",
            PipelineState::Fetching => "FETCHING",
            PipelineState::CheckedOut => "CHECKED_OUT",
            PipelineState::Running => "RUNNING",
            PipelineState::Graded => "GRADED",
            PipelineState::RunFailed => "RUN_FAILED",
            PipelineState::TimedOut => "TIMED_OUT",
            PipelineState::Crashed => "CRASHED",
            PipelineState::FetchFailed => "FETCH_FAILED",
            PipelineState::Skipped => "SKIPPED",
        };
        f.write_str(name)
    }
}

/// Hook for watching pipelines move between states (metrics, tests).
pub trait PipelineObserver: Send + Sync {
    fn on_transition(&self, reference: &RepositoryReference, from: PipelineState, to: PipelineState);
}

/// Current state of one pipeline invocation.
pub(crate) struct StateTracker<'a> {
    reference: &'a RepositoryReference,
    state: PipelineState,
    observer: Option<&'a Arc<dyn PipelineObserver>>,
}

impl<'a> StateTracker<'a> {
    pub(crate) fn new(
        reference: &'a RepositoryReference,
        observer: Option<&'a Arc<dyn PipelineObserver>>,
    ) -> Self {
        Self {
            reference,
            state: PipelineState::Start,
            observer,
        }
    }

    pub(crate) fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal pipeline transition {} -> {}",
            self.state,
            next
        );
        debug!(
            student = %self.reference.student_id,
            from = %self.state,
            to = %next,
            "pipeline transition"
        );
        let from = self.state;
        self.state = next;
        if let Some(observer) = self.observer {
            observer.on_transition(self.reference, from, next);
        }
    }
}
