// src/fetch/git.rs

//! `git` CLI backed fetcher.
//!
//! A fetch is clone (no checkout) -> resolve revision -> detached checkout
//! -> record HEAD. Each git invocation is bounded by the configured network
//! timeout and never prompts for credentials.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::storage::remove_path;
use crate::types::{BoxFuture, RepositoryReference};

use super::{FetchError, RepositoryFetcher, Snapshot};

const STDERR_DETAIL_CHARS: usize = 400;

/// Production fetcher shelling out to `git`.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    git: PathBuf,
    timeout: Duration,
}

impl GitFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            git: PathBuf::from("git"),
            timeout,
        }
    }

    pub fn with_git_binary(mut self, git: impl Into<PathBuf>) -> Self {
        self.git = git.into();
        self
    }

    async fn fetch_inner(
        &self,
        reference: &RepositoryReference,
        destination: &Path,
    ) -> Result<Snapshot, FetchError> {
        let location = reference.location.trim();
        let remote = is_remote(location);

        if location.is_empty() {
            return Err(FetchError::NotFound("empty repository location".to_string()));
        }
        if !remote && !Path::new(location).exists() {
            return Err(FetchError::NotFound(format!("no such path: {location}")));
        }

        // A stale directory from an earlier crash must not leak into the snapshot.
        remove_path(destination)
            .await
            .map_err(|e| FetchError::NotFound(format!("cannot prepare destination: {e}")))?;

        info!(student = %reference.student_id, %location, "cloning repository");
        let out = self
            .git(
                None,
                [
                    OsStr::new("clone"),
                    OsStr::new("--quiet"),
                    OsStr::new("--no-checkout"),
                    OsStr::new("--"),
                    OsStr::new(location),
                    destination.as_os_str(),
                ],
            )
            .await?;
        if !out.status.success() {
            return Err(classify_clone_failure(&stderr_of(&out), remote));
        }

        let target = reference.revision.as_deref().unwrap_or("HEAD");
        let commit = self.resolve_commit(destination, target).await?;

        let out = self
            .git(
                Some(destination),
                ["checkout", "--quiet", "--detach", commit.as_str()],
            )
            .await?;
        if !out.status.success() {
            return Err(FetchError::RevisionMissing(format!(
                "checkout of {commit} failed: {}",
                stderr_of(&out)
            )));
        }

        debug!(student = %reference.student_id, %commit, "snapshot checked out");

        Ok(Snapshot {
            reference: reference.clone(),
            root: destination.to_path_buf(),
            revision: Some(commit),
        })
    }

    /// Resolve `target` to a commit id, trying local refs first and then the
    /// remote-tracking branch of the same name.
    async fn resolve_commit(&self, repo: &Path, target: &str) -> Result<String, FetchError> {
        let mut candidates = vec![format!("{target}^{{commit}}")];
        if target != "HEAD" {
            candidates.push(format!("origin/{target}^{{commit}}"));
        }

        for candidate in &candidates {
            let out = self
                .git(
                    Some(repo),
                    ["rev-parse", "--verify", "--quiet", candidate.as_str()],
                )
                .await?;
            if out.status.success() {
                let commit = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if !commit.is_empty() {
                    return Ok(commit);
                }
            }
        }

        if target == "HEAD" {
            Err(FetchError::RevisionMissing(
                "repository has no commits at HEAD".to_string(),
            ))
        } else {
            Err(FetchError::RevisionMissing(format!(
                "revision '{target}' not found"
            )))
        }
    }

    async fn git<I, S>(&self, cwd: Option<&Path>, args: I) -> Result<Output, FetchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.git);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_SSH_COMMAND", "ssh -o BatchMode=yes")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(e)) => {
                warn!(git = %self.git.display(), error = %e, "could not execute git");
                Err(FetchError::NotFound(format!("could not execute git: {e}")))
            }
            Err(_) => Err(FetchError::NetworkFailure(format!(
                "git did not finish within {}s",
                self.timeout.as_secs_f64()
            ))),
        }
    }
}

impl RepositoryFetcher for GitFetcher {
    fn fetch<'a>(
        &'a self,
        reference: &'a RepositoryReference,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<Snapshot, FetchError>> {
        Box::pin(async move {
            let result = self.fetch_inner(reference, destination).await;
            if result.is_err() {
                if let Err(e) = remove_path(destination).await {
                    warn!(path = %destination.display(), error = %e, "failed to remove partial snapshot");
                }
            }
            result
        })
    }
}

/// URLs (`scheme://...`) and scp-like `user@host:path` locations are remote.
pub fn is_remote(location: &str) -> bool {
    if location.contains("://") {
        return true;
    }
    match location.split_once(':') {
        Some((head, _)) => head.contains('@') && !head.contains('/'),
        None => false,
    }
}

/// Map git's stderr for a failed clone onto a fetch error kind.
pub fn classify_clone_failure(stderr: &str, remote: bool) -> FetchError {
    let lower = stderr.to_lowercase();
    let detail = if stderr.is_empty() {
        "git clone failed".to_string()
    } else {
        stderr.to_string()
    };

    const AUTH: &[&str] = &[
        "authentication failed",
        "could not read username",
        "could not read password",
        "terminal prompts disabled",
        "permission denied (publickey",
        "access denied",
        "returned error: 403",
    ];
    const NOT_FOUND: &[&str] = &[
        "repository not found",
        "does not appear to be a git repository",
        "does not exist",
        "returned error: 404",
        "not found",
    ];
    const NETWORK: &[&str] = &[
        "could not resolve host",
        "connection timed out",
        "connection refused",
        "connection reset",
        "network is unreachable",
        "operation timed out",
        "the remote end hung up",
        "early eof",
        "rpc failed",
        "temporary failure",
        "gnutls",
        "ssl",
    ];

    if AUTH.iter().any(|p| lower.contains(p)) {
        FetchError::AuthFailure(detail)
    } else if NETWORK.iter().any(|p| lower.contains(p)) {
        FetchError::NetworkFailure(detail)
    } else if NOT_FOUND.iter().any(|p| lower.contains(p)) {
        FetchError::NotFound(detail)
    } else if remote {
        FetchError::NetworkFailure(detail)
    } else {
        FetchError::NotFound(detail)
    }
}

fn stderr_of(out: &Output) -> String {
    let text = String::from_utf8_lossy(&out.stderr);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_DETAIL_CHARS {
        return text.to_string();
    }
    text.chars().skip(count - STDERR_DETAIL_CHARS).collect()
}
