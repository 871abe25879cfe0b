#![cfg(unix)]

mod common;
use crate::common::builders::ConfigFileBuilder;
use crate::common::scripts::{init_git_repo, write_script};
use crate::common::{entries_in, init_tracing, with_timeout};

use std::error::Error;
use std::io::Write;

use prograde::build_scheduler;
use prograde::config::load_and_validate;
use prograde::engine::CancelSignal;
use prograde::fetch::FetchError;
use prograde::outcome::Outcome;
use prograde::select_references;
use tempfile::{NamedTempFile, TempDir};

type TestResult = Result<(), Box<dyn Error>>;

const GRADER: &str = r#"if [ -f loop ]; then
  echo "looping forever"
  while :; do sleep 1; done
fi
cat result.json"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_graded_and_hanging_repositories() -> TestResult {
    init_tracing();
    let root = TempDir::new()?;
    let tools = root.path().join("tools");
    std::fs::create_dir_all(&tools)?;
    let grader = write_script(&tools, "grade.sh", GRADER);

    let good = root.path().join("good");
    let good_head = init_git_repo(&good, &[("result.json", r#"{"score": 7.5, "feedback": "ok"}"#)]);
    let hanging = root.path().join("hanging");
    init_git_repo(&hanging, &[("loop", "")]);
    let missing = root.path().join("missing");

    let work = root.path().join("work");
    let mut raw = ConfigFileBuilder::new(&grader.to_string_lossy())
        .with_repo("a", &missing.to_string_lossy())
        .with_repo("b", &good.to_string_lossy())
        .with_repo("c", &hanging.to_string_lossy())
        .with_concurrency(3)
        .with_work_dir(&work)
        .raw();
    raw.task.timeout_seconds = 2.0;
    raw.retry.max_retries = 2;
    let cfg = prograde::config::ConfigFile::try_from(raw)?;

    let scheduler = build_scheduler(&cfg, cfg.config.concurrency);
    let refs = select_references(&cfg, &[])?;
    let report = with_timeout(scheduler.run(refs, &cfg.grading_task(), CancelSignal::never())).await?;

    assert_eq!(report.len(), 3);

    match report.for_student("a") {
        Some(Outcome::FetchFailed {
            reason: FetchError::NotFound(_),
            attempts,
        }) => assert_eq!(*attempts, 1, "NotFound is terminal"),
        other => panic!("a: {other:?}"),
    }

    match report.for_student("b") {
        Some(Outcome::Graded {
            score,
            feedback,
            revision,
        }) => {
            assert_eq!(*score, 7.5);
            assert_eq!(feedback, "ok");
            assert_eq!(revision.as_deref(), Some(good_head.as_str()));
        }
        other => panic!("b: {other:?}"),
    }

    match report.for_student("c") {
        Some(Outcome::TimedOut {
            partial_output,
            elapsed_ms,
            cancelled,
        }) => {
            assert!(!cancelled);
            assert!(*elapsed_ms >= 2000);
            assert!(partial_output.stdout.contains("looping forever"));
        }
        other => panic!("c: {other:?}"),
    }

    assert_eq!(report.meta.counts.graded, 1);
    assert_eq!(report.meta.counts.fetch_failed, 1);
    assert_eq!(report.meta.counts.timed_out, 1);
    assert_eq!(entries_in(&work), 0, "snapshots and run workspace are removed");

    let json: serde_json::Value = serde_json::from_str(&report.to_json_pretty()?)?;
    assert_eq!(json["entries"][1]["outcome"]["outcome"], "graded");
    assert_eq!(json["entries"][0]["outcome"]["reason"]["kind"], "not_found");
    Ok(())
}

#[tokio::test]
async fn config_file_drives_a_marks_run() -> TestResult {
    init_tracing();
    let root = TempDir::new()?;
    let repo = root.path().join("repo");
    init_git_repo(&repo, &[("README.md", "hello")]);
    write_script(
        root.path(),
        "marks.sh",
        "echo 'building...'\necho '## Marks'\necho '* Style: 4'\necho '* Tests: 6'",
    );

    let mut file = NamedTempFile::new_in(root.path())?;
    write!(
        file,
        r#"
[config]
concurrency = 1
work_dir = "work"

[task]
entry_point = "./marks.sh"
timeout_seconds = 10

[payload]
format = "marks"

[[repo]]
student_id = "zoe"
location = "{}"
"#,
        repo.display()
    )?;

    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.config.work_dir, root.path().join("work"));

    let scheduler = build_scheduler(&cfg, 1);
    let refs = select_references(&cfg, &["zoe".to_string()])?;
    let report = with_timeout(scheduler.run(refs, &cfg.grading_task(), CancelSignal::never()))
        .await?;

    match report.for_student("zoe") {
        Some(Outcome::Graded { score, feedback, .. }) => {
            assert_eq!(*score, 5.0);
            assert_eq!(feedback, "Style: 4\nTests: 6");
        }
        other => panic!("zoe: {other:?}"),
    }
    Ok(())
}

#[test]
fn unknown_student_filter_is_rejected() {
    let cfg = ConfigFileBuilder::new("./grade.sh")
        .with_repo("alice", "/srv/alice")
        .build();
    let err = select_references(&cfg, &["mallory".to_string()]).unwrap_err();
    assert!(err.to_string().contains("mallory"));
}
