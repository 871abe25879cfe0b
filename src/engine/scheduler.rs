// src/engine/scheduler.rs

//! Fans a list of references out over a bounded pool of pipelines.
//!
//! Dispatch is strictly in submission order: each reference waits for a
//! concurrency permit before its pipeline is spawned, so at most
//! `concurrency` pipelines are ever in flight. Every pipeline runs in its
//! own tokio task; a panic inside one is caught at the join handle and
//! recorded as an orchestration failure for that reference only.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::errors::{ProgradeError, Result};
use crate::exec::GradingRunner;
use crate::fetch::RepositoryFetcher;
use crate::outcome::Outcome;
use crate::pipeline::GradingPipeline;
use crate::storage::Workspace;
use crate::types::{GradingTask, RepositoryReference};

use super::aggregator::ResultAggregator;
use super::cancel::CancelSignal;
use super::report::Report;

const SKIPPED_REASON: &str = "run cancelled before this repository was started";

pub struct Scheduler<F, R> {
    pipeline: Arc<GradingPipeline<F, R>>,
    concurrency: usize,
    work_dir: PathBuf,
}

impl<F, R> Scheduler<F, R>
where
    F: RepositoryFetcher + 'static,
    R: GradingRunner + 'static,
{
    pub fn new(pipeline: GradingPipeline<F, R>, concurrency: usize, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            concurrency,
            work_dir: work_dir.into(),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Grade every reference and return the complete report.
    ///
    /// Errors only for caller contract violations (invalid task, zero
    /// concurrency, unusable work directory), before any pipeline starts.
    /// Individual repository failures are always reported as outcomes.
    pub async fn run(
        &self,
        refs: Vec<RepositoryReference>,
        task: &GradingTask,
        cancel: CancelSignal,
    ) -> Result<Report> {
        task.validate()?;
        if self.concurrency == 0 {
            return Err(ProgradeError::ConfigError(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let started_at = Utc::now();
        let refs = dedup(refs);
        let workspace = Workspace::create(&self.work_dir)?;
        info!(
            total = refs.len(),
            concurrency = self.concurrency,
            workspace = %workspace.root().display(),
            "grading run started"
        );

        let task = Arc::new(task.clone());
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let (tx, rx) = mpsc::channel::<(RepositoryReference, Outcome)>(self.concurrency * 2);
        let collector = tokio::spawn(ResultAggregator::expecting(&refs).collect(rx));

        let mut in_flight = JoinSet::new();
        for (index, reference) in refs.into_iter().enumerate() {
            let permit = if cancel.is_cancelled() {
                None
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = permits.clone().acquire_owned() => permit.ok(),
                }
            };

            let Some(permit) = permit else {
                debug!(student = %reference.student_id, "skipping after cancellation");
                let skipped = Outcome::Skipped {
                    reason: SKIPPED_REASON.to_string(),
                };
                if tx.send((reference, skipped)).await.is_err() {
                    error!("result collector stopped early");
                }
                continue;
            };

            let slot = workspace.slot(index, &reference);
            let pipeline = Arc::clone(&self.pipeline);
            let task = Arc::clone(&task);
            let cancel = cancel.clone();
            let tx = tx.clone();

            debug!(student = %reference.student_id, index, "dispatching pipeline");
            in_flight.spawn(async move {
                let _permit = permit;
                let job_ref = reference.clone();
                let job = tokio::spawn(async move {
                    pipeline.drive(&job_ref, &task, slot, cancel).await
                });
                let outcome = match job.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(student = %reference.student_id, error = %e, "pipeline task failed");
                        Outcome::orchestration_failure(format!("pipeline task failed: {e}"))
                    }
                };
                if tx.send((reference, outcome)).await.is_err() {
                    error!("result collector stopped early");
                }
            });
        }
        drop(tx);

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "dispatch task failed");
            }
        }

        let aggregator = collector
            .await
            .map_err(|e| anyhow::anyhow!("result collector failed: {e}"))?;
        let report = aggregator.finish(started_at, cancel.is_cancelled());

        if let Err(e) = workspace.remove().await {
            warn!(error = %e, "failed to clean up run workspace");
        }

        info!(
            total = report.meta.total,
            graded = report.meta.counts.graded,
            cancelled = report.meta.cancelled,
            "grading run finished"
        );
        Ok(report)
    }
}

/// Drop repeated references, keeping the first occurrence.
fn dedup(refs: Vec<RepositoryReference>) -> Vec<RepositoryReference> {
    let mut seen = HashSet::with_capacity(refs.len());
    refs.into_iter()
        .filter(|reference| {
            let fresh = seen.insert(reference.clone());
            if !fresh {
                warn!(%reference, "duplicate reference submitted; grading it once");
            }
            fresh
        })
        .collect()
}
