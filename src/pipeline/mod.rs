// src/pipeline/mod.rs

//! Per-repository grading pipeline: fetch -> checkout -> run -> collect.
//!
//! A pipeline invocation always ends in exactly one [`Outcome`] and always
//! releases its snapshot storage, whichever way it ends. If the future is
//! dropped mid-flight (scheduler abort), the [`SnapshotSlot`] drop guard
//! reclaims the storage instead.
//!
//! No grader is started once the run is cancelled. A fetch attempt still in
//! flight is abandoned and the pipeline ends as [`Outcome::Skipped`].

pub mod payload;
pub mod state;

use std::sync::Arc;

use tracing::{info, warn};

use crate::engine::CancelSignal;
use crate::errors::Result;
use crate::exec::{ExitState, GradingRunner, InfrastructureError, RunResult};
use crate::fetch::{fetch_with_retry, RepositoryFetcher, RetryPolicy};
use crate::outcome::{CapturedOutput, Outcome, RunFailure};
use crate::storage::SnapshotSlot;
use crate::types::{GradingTask, PayloadSpec, RepositoryReference};

pub use payload::{parse_payload, GradePayload};
pub use state::{PipelineObserver, PipelineState};

use state::StateTracker;

const DIAGNOSTIC_STDERR_CHARS: usize = 2000;

/// Drives one repository through fetch and run using pluggable collaborators.
pub struct GradingPipeline<F, R> {
    fetcher: Arc<F>,
    runner: Arc<R>,
    retry: RetryPolicy,
    observer: Option<Arc<dyn PipelineObserver>>,
}

impl<F, R> GradingPipeline<F, R>
where
    F: RepositoryFetcher,
    R: GradingRunner,
{
    pub fn new(fetcher: F, runner: R, retry: RetryPolicy) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            runner: Arc::new(runner),
            retry,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Grade one repository into `slot`.
    ///
    /// Returns an error only when `task` is invalid, before anything starts.
    pub async fn execute(
        &self,
        reference: &RepositoryReference,
        task: &GradingTask,
        slot: SnapshotSlot,
        cancel: CancelSignal,
    ) -> Result<Outcome> {
        task.validate()?;
        Ok(self.drive(reference, task, slot, cancel).await)
    }

    /// [`Self::execute`] for a task the caller has already validated.
    pub(crate) async fn drive(
        &self,
        reference: &RepositoryReference,
        task: &GradingTask,
        slot: SnapshotSlot,
        cancel: CancelSignal,
    ) -> Outcome {
        let mut state = StateTracker::new(reference, self.observer.as_ref());

        state.advance(PipelineState::Fetching);
        // Dropping the fetch future on cancellation kills any git child.
        let fetched = tokio::select! {
            biased;
            fetched = fetch_with_retry(
                self.fetcher.as_ref(),
                &self.retry,
                reference,
                slot.path(),
                &cancel,
            ) => Some(fetched),
            _ = cancel.cancelled() => None,
        };

        let Some(fetched) = fetched else {
            return skip(state, reference, slot, "run cancelled while fetching").await;
        };
        let (snapshot, attempts) = match fetched {
            Ok(ok) => ok,
            Err(failure) => {
                state.advance(PipelineState::FetchFailed);
                slot.release().await;
                return Outcome::FetchFailed {
                    reason: failure.error,
                    attempts: failure.attempts,
                };
            }
        };
        state.advance(PipelineState::CheckedOut);
        info!(
            student = %reference.student_id,
            attempts,
            revision = snapshot.revision.as_deref().unwrap_or("-"),
            "snapshot ready"
        );

        if cancel.is_cancelled() {
            return skip(state, reference, slot, "run cancelled before grading started").await;
        }

        state.advance(PipelineState::Running);
        let result = self.runner.run(task, &snapshot, cancel).await;
        let outcome = classify_run(result, &task.payload, snapshot.revision.clone());

        state.advance(PipelineState::after_run(&outcome));
        slot.release().await;
        outcome
    }
}

/// End a pipeline that was cancelled before its grader started.
async fn skip(
    mut state: StateTracker<'_>,
    reference: &RepositoryReference,
    slot: SnapshotSlot,
    reason: &str,
) -> Outcome {
    info!(student = %reference.student_id, "{reason}");
    state.advance(PipelineState::Skipped);
    slot.release().await;
    Outcome::Skipped {
        reason: reason.to_string(),
    }
}

/// Map a runner result onto the outcome taxonomy.
pub fn classify_run(
    result: std::result::Result<RunResult, InfrastructureError>,
    payload: &PayloadSpec,
    revision: Option<String>,
) -> Outcome {
    let result = match result {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "runner infrastructure failure");
            return Outcome::RunFailed {
                reason: RunFailure::Infrastructure {
                    detail: e.to_string(),
                },
                partial_output: CapturedOutput::default(),
            };
        }
    };

    match result {
        RunResult::TimedOut {
            output,
            elapsed,
            cancelled,
        } => Outcome::TimedOut {
            partial_output: output,
            elapsed_ms: elapsed.as_millis() as u64,
            cancelled,
        },
        RunResult::Completed {
            status: ExitState::Signal(signal),
            output,
            ..
        } => Outcome::Crashed {
            signal: Some(signal),
            exit_code: None,
            diagnostics: crash_diagnostics(Some(signal), &output),
        },
        RunResult::Completed {
            status: ExitState::Code(0),
            output,
            ..
        } => match parse_payload(&output.stdout, payload) {
            Ok(GradePayload { score, feedback }) => Outcome::Graded {
                score,
                feedback,
                revision,
            },
            Err(detail) => Outcome::RunFailed {
                reason: RunFailure::UnparsableResult { detail },
                partial_output: output,
            },
        },
        // Negative codes are abnormal terminations reported without a
        // signal (e.g. Windows exception statuses).
        RunResult::Completed {
            status: ExitState::Code(code),
            output,
            ..
        } if code < 0 => Outcome::Crashed {
            signal: None,
            exit_code: Some(code),
            diagnostics: crash_diagnostics(None, &output),
        },
        RunResult::Completed {
            status: ExitState::Code(code),
            output,
            ..
        } => Outcome::RunFailed {
            reason: RunFailure::NonZeroExit { code },
            partial_output: output,
        },
    }
}

fn crash_diagnostics(signal: Option<i32>, output: &CapturedOutput) -> String {
    let mut text = match signal {
        Some(sig) => format!("terminated by {}", describe_signal(sig)),
        None => "terminated abnormally".to_string(),
    };
    if let Some(hint) = signal.and_then(limit_hint) {
        text.push_str(" (");
        text.push_str(hint);
        text.push(')');
    }
    let tail = output.stderr_tail(DIAGNOSTIC_STDERR_CHARS);
    if !tail.is_empty() {
        text.push_str("\n--- stderr ---\n");
        text.push_str(tail);
    }
    text
}

#[cfg(unix)]
fn describe_signal(sig: i32) -> String {
    match nix::sys::signal::Signal::try_from(sig) {
        Ok(s) => format!("{} ({sig})", s.as_str()),
        Err(_) => format!("signal {sig}"),
    }
}

#[cfg(not(unix))]
fn describe_signal(sig: i32) -> String {
    format!("signal {sig}")
}

#[cfg(unix)]
fn limit_hint(sig: i32) -> Option<&'static str> {
    use nix::sys::signal::Signal;
    match Signal::try_from(sig).ok()? {
        Signal::SIGXCPU => Some("CPU time limit exceeded"),
        Signal::SIGXFSZ => Some("file size limit exceeded"),
        Signal::SIGSEGV | Signal::SIGBUS => Some("memory fault; the memory limit may have been hit"),
        _ => None,
    }
}

#[cfg(not(unix))]
fn limit_hint(_sig: i32) -> Option<&'static str> {
    None
}
