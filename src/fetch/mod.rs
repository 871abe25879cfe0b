// src/fetch/mod.rs

//! Repository fetching.
//!
//! - [`RepositoryFetcher`] is the seam the pipeline talks to.
//! - [`git`] contains the production implementation driving the `git` CLI.
//! - [`retry`] wraps any fetcher with the bounded exponential-backoff policy
//!   for transient network failures.
//!
//! Contract for every implementation: when `fetch` returns an error the
//! destination must not exist. A snapshot is only handed out once the
//! working copy is fully checked out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BoxFuture, RepositoryReference};

pub mod git;
pub mod retry;

pub use git::GitFetcher;
pub use retry::{fetch_with_retry, FetchFailure, RetryPolicy};

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchError {
    #[error("repository not found: {0}")]
    NotFound(String),

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("revision missing: {0}")]
    RevisionMissing(String),
}

impl FetchError {
    /// Only network failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::NetworkFailure(_))
    }
}

/// A checked-out working copy of one repository.
///
/// The snapshot only describes the files; the storage itself belongs to the
/// pipeline's [`crate::storage::SnapshotSlot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub reference: RepositoryReference,
    pub root: PathBuf,
    /// Commit id of the checked-out tree, if known.
    pub revision: Option<String>,
}

impl Snapshot {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Trait abstracting how a reference becomes a snapshot on disk.
///
/// Production code uses [`GitFetcher`]; tests provide scripted fakes.
pub trait RepositoryFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        reference: &'a RepositoryReference,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<Snapshot, FetchError>>;
}

impl<T: RepositoryFetcher + ?Sized> RepositoryFetcher for Arc<T> {
    fn fetch<'a>(
        &'a self,
        reference: &'a RepositoryReference,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<Snapshot, FetchError>> {
        (**self).fetch(reference, destination)
    }
}
