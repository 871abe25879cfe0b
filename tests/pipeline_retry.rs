mod common;
use crate::common::builders::{ReferenceBuilder, TaskBuilder};
use crate::common::fakes::{RunBehaviour, ScriptedFetcher, ScriptedRunner, StateRecorder, FAKE_REVISION};
use crate::common::{fake_pipeline, init_tracing, quick_retry, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use prograde::engine::{CancelHandle, CancelSignal};
use prograde::errors::ProgradeError;
use prograde::fetch::{FetchError, RetryPolicy};
use prograde::outcome::Outcome;
use prograde::pipeline::PipelineState;
use prograde::storage::SnapshotSlot;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

const RETRIES: u32 = 3;

fn network() -> FetchError {
    FetchError::NetworkFailure("connection reset".to_string())
}

#[tokio::test]
async fn network_failures_up_to_retry_limit_still_grade() -> TestResult {
    init_tracing();
    let tmp = TempDir::new()?;
    let reference = ReferenceBuilder::new("alice").build();
    let fetcher = ScriptedFetcher::new().fail_times(&reference.location, network(), RETRIES as usize);
    let (pipeline, fetcher, runner) =
        fake_pipeline(fetcher, ScriptedRunner::new(), quick_retry(RETRIES));

    let slot_path = tmp.path().join("alice");
    let task = TaskBuilder::new("grade").build();
    let outcome = with_timeout(pipeline.execute(
        &reference,
        &task,
        SnapshotSlot::at(&slot_path),
        CancelSignal::never(),
    ))
    .await?;

    match outcome {
        Outcome::Graded { score, revision, .. } => {
            assert_eq!(score, 1.0);
            assert_eq!(revision.as_deref(), Some(FAKE_REVISION));
        }
        other => panic!("expected Graded, got {other:?}"),
    }
    assert_eq!(fetcher.attempts(&reference.location), RETRIES + 1);

    // The runner saw a materialized snapshot; afterwards the storage is gone.
    assert_eq!(runner.snapshots(), vec![(slot_path.clone(), true)]);
    assert!(!slot_path.exists());
    Ok(())
}

#[tokio::test]
async fn one_failure_past_retry_limit_is_fetch_failed() -> TestResult {
    init_tracing();
    let tmp = TempDir::new()?;
    let reference = ReferenceBuilder::new("bob").build();
    let fetcher =
        ScriptedFetcher::new().fail_times(&reference.location, network(), RETRIES as usize + 1);
    let (pipeline, fetcher, runner) =
        fake_pipeline(fetcher, ScriptedRunner::new(), quick_retry(RETRIES));

    let slot_path = tmp.path().join("bob");
    let task = TaskBuilder::new("grade").build();
    let outcome = pipeline
        .execute(&reference, &task, SnapshotSlot::at(&slot_path), CancelSignal::never())
        .await?;

    assert_eq!(
        outcome,
        Outcome::FetchFailed {
            reason: network(),
            attempts: RETRIES + 1,
        }
    );
    assert_eq!(fetcher.attempts(&reference.location), RETRIES + 1);
    assert!(runner.started().is_empty(), "runner must not run without a snapshot");
    assert!(!slot_path.exists(), "partial clone must be removed");
    Ok(())
}

#[tokio::test]
async fn non_network_errors_are_not_retried() -> TestResult {
    init_tracing();
    let tmp = TempDir::new()?;

    for error in [
        FetchError::AuthFailure("denied".to_string()),
        FetchError::NotFound("gone".to_string()),
        FetchError::RevisionMissing("no such branch".to_string()),
    ] {
        let reference = ReferenceBuilder::new("carol").build();
        let fetcher = ScriptedFetcher::new().always_fail(&reference.location, error.clone());
        let (pipeline, fetcher, _runner) =
            fake_pipeline(fetcher, ScriptedRunner::new(), quick_retry(RETRIES));

        let task = TaskBuilder::new("grade").build();
        let outcome = pipeline
            .execute(
                &reference,
                &task,
                SnapshotSlot::at(tmp.path().join("carol")),
                CancelSignal::never(),
            )
            .await?;

        assert_eq!(
            outcome,
            Outcome::FetchFailed {
                reason: error.clone(),
                attempts: 1,
            }
        );
        assert_eq!(fetcher.attempts(&reference.location), 1, "{error:?} was retried");
    }
    Ok(())
}

#[tokio::test]
async fn zero_retries_means_a_single_attempt() -> TestResult {
    let tmp = TempDir::new()?;
    let reference = ReferenceBuilder::new("dave").build();
    let fetcher = ScriptedFetcher::new().fail_times(&reference.location, network(), 1);
    let (pipeline, fetcher, _runner) =
        fake_pipeline(fetcher, ScriptedRunner::new(), quick_retry(0));

    let task = TaskBuilder::new("grade").build();
    let outcome = pipeline
        .execute(&reference, &task, SnapshotSlot::at(tmp.path().join("d")), CancelSignal::never())
        .await?;

    assert!(matches!(outcome, Outcome::FetchFailed { attempts: 1, .. }));
    assert_eq!(fetcher.attempts(&reference.location), 1);
    Ok(())
}

#[tokio::test]
async fn cancellation_interrupts_backoff() -> TestResult {
    init_tracing();
    let tmp = TempDir::new()?;
    let reference = ReferenceBuilder::new("erin").build();
    let fetcher = ScriptedFetcher::new().always_fail(&reference.location, network());
    let slow = RetryPolicy::new(5, Duration::from_secs(30), Duration::from_secs(30));
    let (pipeline, fetcher, _runner) = fake_pipeline(fetcher, ScriptedRunner::new(), slow);

    let handle = CancelHandle::new();
    let signal = handle.signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
    });

    let started = Instant::now();
    let task = TaskBuilder::new("grade").build();
    let outcome = with_timeout(pipeline.execute(
        &reference,
        &task,
        SnapshotSlot::at(tmp.path().join("erin")),
        signal,
    ))
    .await?;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(outcome, Outcome::FetchFailed { attempts: 1, .. }));
    assert_eq!(fetcher.attempts(&reference.location), 1);
    Ok(())
}

#[tokio::test]
async fn invalid_task_is_rejected_before_fetching() -> TestResult {
    let tmp = TempDir::new()?;
    let reference = ReferenceBuilder::new("frank").build();
    let (pipeline, fetcher, _runner) =
        fake_pipeline(ScriptedFetcher::new(), ScriptedRunner::new(), quick_retry(RETRIES));

    let task = TaskBuilder::new("grade").timeout(Duration::ZERO).build();
    let result = pipeline
        .execute(&reference, &task, SnapshotSlot::at(tmp.path().join("f")), CancelSignal::never())
        .await;

    match result {
        Err(ProgradeError::InvalidTask(msg)) => assert!(msg.contains("timeout")),
        other => panic!("expected InvalidTask, got {other:?}"),
    }
    assert_eq!(fetcher.attempts(&reference.location), 0);
    Ok(())
}

#[tokio::test]
async fn pipeline_walks_the_documented_states() -> TestResult {
    let tmp = TempDir::new()?;
    let ok = ReferenceBuilder::new("grace").build();
    let crashed = ReferenceBuilder::new("heidi").build();
    let unreachable = ReferenceBuilder::new("ivan").build();

    let fetcher = ScriptedFetcher::new()
        .always_fail(&unreachable.location, FetchError::NotFound("gone".to_string()));
    let runner = ScriptedRunner::new().for_student("heidi", RunBehaviour::Signal(9));
    let recorder = Arc::new(StateRecorder::new());
    let (pipeline, _fetcher, _runner) = fake_pipeline(fetcher, runner, quick_retry(RETRIES));
    let pipeline = pipeline.with_observer(recorder.clone());

    let task = TaskBuilder::new("grade").build();
    for (i, reference) in [&ok, &crashed, &unreachable].into_iter().enumerate() {
        pipeline
            .execute(
                reference,
                &task,
                SnapshotSlot::at(tmp.path().join(i.to_string())),
                CancelSignal::never(),
            )
            .await?;
    }

    use PipelineState::*;
    assert_eq!(recorder.path_of("grace"), vec![Start, Fetching, CheckedOut, Running, Graded]);
    assert_eq!(recorder.path_of("heidi"), vec![Start, Fetching, CheckedOut, Running, Crashed]);
    assert_eq!(recorder.path_of("ivan"), vec![Start, Fetching, FetchFailed]);

    for (_, from, to) in recorder.transitions() {
        assert!(from.can_transition_to(to), "illegal edge {from} -> {to}");
    }
    Ok(())
}

#[tokio::test]
async fn cancelled_run_never_starts_the_grader() -> TestResult {
    let tmp = TempDir::new()?;
    let reference = ReferenceBuilder::new("judy").build();
    let recorder = Arc::new(StateRecorder::new());
    let (pipeline, fetcher, runner) =
        fake_pipeline(ScriptedFetcher::new(), ScriptedRunner::new(), quick_retry(0));
    let pipeline = pipeline.with_observer(recorder.clone());

    let handle = CancelHandle::new();
    handle.cancel();

    let slot_path = tmp.path().join("judy");
    let task = TaskBuilder::new("grade").build();
    let outcome = pipeline
        .execute(&reference, &task, SnapshotSlot::at(&slot_path), handle.signal())
        .await?;

    assert!(matches!(outcome, Outcome::Skipped { .. }), "{outcome:?}");
    assert_eq!(fetcher.attempts(&reference.location), 1);
    assert!(runner.started().is_empty());
    assert!(!slot_path.exists(), "fetched snapshot must be released");

    use PipelineState::*;
    assert_eq!(recorder.path_of("judy"), vec![Start, Fetching, CheckedOut, Skipped]);
    Ok(())
}

#[tokio::test]
async fn failed_run_releases_its_snapshot() -> TestResult {
    let tmp = TempDir::new()?;
    let reference = ReferenceBuilder::new("kim").build();
    let runner = ScriptedRunner::new().by_default(RunBehaviour::Exit {
        code: 2,
        stdout: "boom".to_string(),
    });
    let (pipeline, _fetcher, _runner) = fake_pipeline(ScriptedFetcher::new(), runner, quick_retry(0));

    let slot_path = tmp.path().join("kim");
    let task = TaskBuilder::new("grade").build();
    let outcome = pipeline
        .execute(&reference, &task, SnapshotSlot::at(&slot_path), CancelSignal::never())
        .await?;

    match outcome {
        Outcome::RunFailed { partial_output, .. } => assert_eq!(partial_output.stdout, "boom"),
        other => panic!("expected RunFailed, got {other:?}"),
    }
    assert!(!slot_path.exists());
    Ok(())
}
