// src/storage.rs

//! Pipeline-scoped snapshot storage.
//!
//! A [`Workspace`] is created once per scheduler run under the configured
//! work directory. Each pipeline receives its own [`SnapshotSlot`], a
//! directory path that no other pipeline ever sees. The slot removes its
//! directory when released, and also on drop so that an aborted pipeline
//! future still reclaims its storage.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::RepositoryReference;

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Root directory for one scheduler run.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create `<work_dir>/run-<timestamp>-<pid>-<seq>`.
    pub fn create(work_dir: &Path) -> Result<Self> {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        let seq = RUN_SEQ.fetch_add(1, Ordering::Relaxed);
        let root = work_dir.join(format!("run-{stamp}-{}-{seq}", std::process::id()));
        std::fs::create_dir_all(&root)
            .with_context(|| format!("creating run workspace {:?}", root))?;
        debug!(root = %root.display(), "created run workspace");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate the storage slot for the `index`-th submitted reference.
    ///
    /// The index prefix keeps slots distinct even when two references share
    /// a student id. The directory itself is not created; fetchers expect a
    /// non-existent destination.
    pub fn slot(&self, index: usize, reference: &RepositoryReference) -> SnapshotSlot {
        let name = format!("{index:05}-{}", sanitize(&reference.student_id));
        SnapshotSlot {
            path: Some(self.root.join(name)),
        }
    }

    /// Remove the run workspace. Slots are expected to be released already;
    /// anything left behind is removed as well.
    pub async fn remove(self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Storage location owned by exactly one pipeline.
#[derive(Debug)]
pub struct SnapshotSlot {
    path: Option<PathBuf>,
}

impl SnapshotSlot {
    /// Slot at an explicit path, for callers managing their own layout.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Remove whatever the slot holds. Idempotent.
    pub async fn release(mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = remove_path(&path).await {
                warn!(path = %path.display(), error = %e, "failed to release snapshot storage");
            } else {
                debug!(path = %path.display(), "released snapshot storage");
            }
        }
    }
}

impl Drop for SnapshotSlot {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => debug!(path = %path.display(), "snapshot storage reclaimed on drop"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to reclaim snapshot storage on drop"),
            }
        }
    }
}

/// Remove a directory tree (or stray file); missing paths are fine.
pub async fn remove_path(path: &Path) -> io::Result<()> {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn sanitize(student_id: &str) -> String {
    let cleaned: String = student_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(48)
        .collect();
    if cleaned.is_empty() {
        "anon".to_string()
    } else {
        cleaned
    }
}
