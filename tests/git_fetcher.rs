mod common;
use crate::common::builders::ReferenceBuilder;
use crate::common::init_tracing;
use crate::common::scripts::{commit_files, create_branch, init_git_repo};

use std::error::Error;
use std::time::Duration;

use prograde::fetch::git::{classify_clone_failure, is_remote};
use prograde::fetch::{FetchError, GitFetcher, RepositoryFetcher};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

fn fetcher() -> GitFetcher {
    GitFetcher::new(Duration::from_secs(30))
}

#[tokio::test]
async fn clones_default_head_and_records_commit() -> TestResult {
    init_tracing();
    let origin = TempDir::new()?;
    let work = TempDir::new()?;
    let head = init_git_repo(origin.path(), &[("score.json", "{\"score\": 1}")]);

    let reference = ReferenceBuilder::new("alice")
        .location(origin.path().to_string_lossy())
        .build();
    let dest = work.path().join("alice");
    let snapshot = fetcher().fetch(&reference, &dest).await?;

    assert_eq!(snapshot.root(), dest.as_path());
    assert_eq!(snapshot.revision.as_deref(), Some(head.as_str()));
    assert_eq!(std::fs::read_to_string(dest.join("score.json"))?, "{\"score\": 1}");
    Ok(())
}

#[tokio::test]
async fn checks_out_requested_branch_and_commit() -> TestResult {
    let origin = TempDir::new()?;
    let work = TempDir::new()?;
    let first = init_git_repo(origin.path(), &[("version", "one")]);
    create_branch(origin.path(), "submission");
    let second = commit_files(origin.path(), &[("version", "two")], "second");

    let location = origin.path().to_string_lossy().into_owned();

    let on_branch = ReferenceBuilder::new("bob")
        .location(location.clone())
        .revision("submission")
        .build();
    let dest = work.path().join("branch");
    let snapshot = fetcher().fetch(&on_branch, &dest).await?;
    assert_eq!(snapshot.revision.as_deref(), Some(first.as_str()));
    assert_eq!(std::fs::read_to_string(dest.join("version"))?, "one");

    let at_commit = ReferenceBuilder::new("bob")
        .location(location)
        .revision(second.clone())
        .build();
    let dest = work.path().join("commit");
    let snapshot = fetcher().fetch(&at_commit, &dest).await?;
    assert_eq!(snapshot.revision.as_deref(), Some(second.as_str()));
    assert_eq!(std::fs::read_to_string(dest.join("version"))?, "two");
    Ok(())
}

#[tokio::test]
async fn missing_revision_is_reported_and_cleaned_up() -> TestResult {
    let origin = TempDir::new()?;
    let work = TempDir::new()?;
    init_git_repo(origin.path(), &[("a.txt", "a")]);

    let reference = ReferenceBuilder::new("carol")
        .location(origin.path().to_string_lossy())
        .revision("no-such-branch")
        .build();
    let dest = work.path().join("carol");

    match fetcher().fetch(&reference, &dest).await {
        Err(FetchError::RevisionMissing(msg)) => assert!(msg.contains("no-such-branch")),
        other => panic!("expected RevisionMissing, got {other:?}"),
    }
    assert!(!dest.exists(), "failed fetch must not leave a snapshot behind");
    Ok(())
}

#[tokio::test]
async fn unknown_locations_are_not_found() -> TestResult {
    let work = TempDir::new()?;
    let not_a_repo = TempDir::new()?;
    std::fs::write(not_a_repo.path().join("file"), "x")?;

    for location in [
        work.path().join("does-not-exist").to_string_lossy().into_owned(),
        not_a_repo.path().to_string_lossy().into_owned(),
        String::new(),
    ] {
        let reference = ReferenceBuilder::new("dave").location(location.clone()).build();
        let dest = work.path().join("dave");
        match fetcher().fetch(&reference, &dest).await {
            Err(FetchError::NotFound(_)) => {}
            other => panic!("{location:?}: expected NotFound, got {other:?}"),
        }
        assert!(!dest.exists());
    }
    Ok(())
}

#[tokio::test]
async fn missing_git_binary_is_not_found() -> TestResult {
    let origin = TempDir::new()?;
    let work = TempDir::new()?;
    init_git_repo(origin.path(), &[("a.txt", "a")]);

    let reference = ReferenceBuilder::new("erin")
        .location(origin.path().to_string_lossy())
        .build();
    let fetcher = fetcher().with_git_binary("/nonexistent/git");

    match fetcher.fetch(&reference, &work.path().join("erin")).await {
        Err(FetchError::NotFound(msg)) => assert!(msg.contains("could not execute git")),
        other => panic!("expected NotFound, got {other:?}"),
    }
    Ok(())
}

#[test]
fn remote_locations_are_recognised() {
    assert!(is_remote("https://github.com/course/alice"));
    assert!(is_remote("ssh://git@example.com/alice.git"));
    assert!(is_remote("git@github.com:course/alice.git"));
    assert!(!is_remote("/srv/repos/alice"));
    assert!(!is_remote("./alice"));
    assert!(!is_remote("C:/repos/alice"));
}

#[test]
fn clone_failures_map_to_error_kinds() {
    let auth = classify_clone_failure(
        "fatal: could not read Username for 'https://github.com': terminal prompts disabled",
        true,
    );
    assert!(matches!(auth, FetchError::AuthFailure(_)));

    let network = classify_clone_failure(
        "fatal: unable to access 'https://x/': Could not resolve host: x",
        true,
    );
    assert!(matches!(network, FetchError::NetworkFailure(_)));

    let missing = classify_clone_failure("remote: Repository not found.", true);
    assert!(matches!(missing, FetchError::NotFound(_)));

    // Unknown remote errors are treated as transient; unknown local ones are not.
    assert!(matches!(classify_clone_failure("fatal: ???", true), FetchError::NetworkFailure(_)));
    assert!(matches!(classify_clone_failure("fatal: ???", false), FetchError::NotFound(_)));
}
