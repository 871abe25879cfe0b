use std::time::Duration;

use prograde::exec::{ExitState, InfrastructureError, RunResult};
use prograde::outcome::{CapturedOutput, Outcome, RunFailure};
use prograde::pipeline::{classify_run, parse_payload};
use prograde::types::{PayloadFormat, PayloadSpec};

fn json() -> PayloadSpec {
    PayloadSpec::default()
}

fn marks() -> PayloadSpec {
    PayloadSpec {
        format: PayloadFormat::Marks,
        ..PayloadSpec::default()
    }
}

fn completed(status: ExitState, stdout: &str, stderr: &str) -> Result<RunResult, InfrastructureError> {
    Ok(RunResult::Completed {
        status,
        output: CapturedOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            ..CapturedOutput::default()
        },
        elapsed: Duration::from_millis(5),
    })
}

#[test]
fn json_payload_on_last_line_wins_over_logging() {
    let stdout = "compiling...\n{\"score\": 1}\nrunning tests\n{\"score\": 8.25, \"feedback\": \"nice\"}\n";
    let graded = parse_payload(stdout, &json()).unwrap();
    assert_eq!(graded.score, 8.25);
    assert_eq!(graded.feedback, "nice");
}

#[test]
fn pretty_printed_json_is_accepted() {
    let graded = parse_payload("{\n  \"score\": 6,\n  \"feedback\": null\n}\n", &json()).unwrap();
    assert_eq!(graded.score, 6.0);
    assert_eq!(graded.feedback, "");
}

#[test]
fn custom_field_names_are_honoured() {
    let spec = PayloadSpec {
        score_field: "points".to_string(),
        feedback_field: "comment".to_string(),
        ..PayloadSpec::default()
    };
    let graded = parse_payload(r#"{"points": 3, "comment": "meh"}"#, &spec).unwrap();
    assert_eq!(graded.score, 3.0);
    assert_eq!(graded.feedback, "meh");
}

#[test]
fn malformed_json_payloads_are_rejected() {
    for (stdout, needle) in [
        ("", "no payload"),
        ("all good!", "no JSON object"),
        ("[1, 2, 3]", "not a JSON object"),
        (r#"{"feedback": "x"}"#, "missing 'score'"),
        (r#"{"score": "ten"}"#, "not a finite number"),
        (r#"{"score": "7.5"}"#, "not a finite number"),
        (r#"{"score": true}"#, "not a finite number"),
    ] {
        let err = parse_payload(stdout, &json()).unwrap_err();
        assert!(err.contains(needle), "{stdout:?}: {err}");
    }
}

#[test]
fn marks_payload_averages_categories() {
    let stdout = "## Marks\n* Old: 0\n\nnoise\n## Marks\n* Style: 3\n* Tests: 4.5\n* Docs : 6\nnot a mark\n";
    let graded = parse_payload(stdout, &marks()).unwrap();
    assert_eq!(graded.score, 4.5);
    assert_eq!(graded.feedback, "Style: 3\nTests: 4.5\nDocs: 6");
}

#[test]
fn marks_payload_needs_heading_and_lines() {
    assert!(parse_payload("* Style: 3\n", &marks()).unwrap_err().contains("## Marks"));
    assert!(parse_payload("## Marks\nnothing here\n", &marks())
        .unwrap_err()
        .contains("no '* Category: value' lines"));
}

#[test]
fn classify_maps_every_run_result() {
    let graded = classify_run(
        completed(ExitState::Code(0), r#"{"score": 7.5, "feedback": "ok"}"#, ""),
        &json(),
        Some("abc".to_string()),
    );
    assert_eq!(
        graded,
        Outcome::Graded {
            score: 7.5,
            feedback: "ok".to_string(),
            revision: Some("abc".to_string()),
        }
    );

    match classify_run(completed(ExitState::Code(0), "garbage", ""), &json(), None) {
        Outcome::RunFailed {
            reason: RunFailure::UnparsableResult { .. },
            partial_output,
        } => assert_eq!(partial_output.stdout, "garbage"),
        other => panic!("{other:?}"),
    }

    match classify_run(completed(ExitState::Code(4), "", "traceback"), &json(), None) {
        Outcome::RunFailed {
            reason: RunFailure::NonZeroExit { code },
            partial_output,
        } => {
            assert_eq!(code, 4);
            assert_eq!(partial_output.stderr, "traceback");
        }
        other => panic!("{other:?}"),
    }

    match classify_run(completed(ExitState::Code(-1), "", ""), &json(), None) {
        Outcome::Crashed {
            signal, exit_code, ..
        } => {
            assert_eq!(signal, None);
            assert_eq!(exit_code, Some(-1));
        }
        other => panic!("{other:?}"),
    }

    let timed_out = classify_run(
        Ok(RunResult::TimedOut {
            output: CapturedOutput {
                stdout: "halfway".to_string(),
                ..CapturedOutput::default()
            },
            elapsed: Duration::from_millis(2500),
            cancelled: false,
        }),
        &json(),
        None,
    );
    match timed_out {
        Outcome::TimedOut {
            partial_output,
            elapsed_ms,
            cancelled,
        } => {
            assert_eq!(partial_output.stdout, "halfway");
            assert_eq!(elapsed_ms, 2500);
            assert!(!cancelled);
        }
        other => panic!("{other:?}"),
    }

    let infra = classify_run(
        Err(InfrastructureError::Spawn {
            program: "grade".to_string(),
            detail: "permission denied".to_string(),
        }),
        &json(),
        None,
    );
    assert!(matches!(
        infra,
        Outcome::RunFailed {
            reason: RunFailure::Infrastructure { .. },
            ..
        }
    ));
}

#[cfg(unix)]
#[test]
fn crash_diagnostics_name_the_signal_and_keep_stderr() {
    // SIGXCPU is 24 on Linux.
    match classify_run(completed(ExitState::Signal(24), "", "spinning\n"), &json(), None) {
        Outcome::Crashed {
            signal, diagnostics, ..
        } => {
            assert_eq!(signal, Some(24));
            assert!(diagnostics.contains("SIGXCPU"), "{diagnostics}");
            assert!(diagnostics.contains("CPU time limit"), "{diagnostics}");
            assert!(diagnostics.contains("spinning"), "{diagnostics}");
        }
        other => panic!("{other:?}"),
    }

    match classify_run(completed(ExitState::Signal(11), "", ""), &json(), None) {
        Outcome::Crashed { diagnostics, .. } => assert!(diagnostics.contains("SIGSEGV")),
        other => panic!("{other:?}"),
    }
}
