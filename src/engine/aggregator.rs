// src/engine/aggregator.rs

//! Merges per-repository outcomes into a [`Report`].
//!
//! The aggregator is a plain synchronous value with a single owner, which
//! makes it the serialization point for concurrent pipelines: the scheduler
//! funnels every outcome through one channel into [`ResultAggregator::collect`].
//! It never re-runs or alters an outcome.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::outcome::Outcome;
use crate::types::RepositoryReference;

use super::report::{OutcomeCounts, Report, ReportEntry, ReportMeta};

#[derive(Debug, Default)]
pub struct ResultAggregator {
    order: Vec<RepositoryReference>,
    outcomes: Vec<Option<Outcome>>,
    position: HashMap<RepositoryReference, usize>,
    anomalies: Vec<String>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register the expected references so the report keeps submission
    /// order and can detect references that never reported.
    pub fn expecting<'a>(refs: impl IntoIterator<Item = &'a RepositoryReference>) -> Self {
        let mut agg = Self::new();
        for reference in refs {
            agg.slot_for(reference);
        }
        agg
    }

    /// Insert one outcome. A second outcome for the same reference replaces
    /// the first and is logged as an anomaly.
    pub fn record(&mut self, reference: RepositoryReference, outcome: Outcome) {
        let idx = self.slot_for(&reference);
        debug!(student = %reference.student_id, kind = ?outcome.kind(), "outcome recorded");
        if let Some(previous) = self.outcomes[idx].replace(outcome) {
            let note = format!(
                "duplicate outcome for {reference}: {:?} replaced by a later result",
                previous.kind()
            );
            warn!("{note}");
            self.anomalies.push(note);
        }
    }

    pub fn is_recorded(&self, reference: &RepositoryReference) -> bool {
        self.position
            .get(reference)
            .is_some_and(|&idx| self.outcomes[idx].is_some())
    }

    /// Expected references with no outcome yet.
    pub fn missing(&self) -> Vec<RepositoryReference> {
        self.order
            .iter()
            .zip(&self.outcomes)
            .filter(|(_, outcome)| outcome.is_none())
            .map(|(reference, _)| reference.clone())
            .collect()
    }

    /// Drain `(reference, outcome)` pairs until every sender is gone.
    pub async fn collect(mut self, mut rx: mpsc::Receiver<(RepositoryReference, Outcome)>) -> Self {
        while let Some((reference, outcome)) = rx.recv().await {
            self.record(reference, outcome);
        }
        self
    }

    /// Build the report. Any expected reference that never reported is
    /// filled with an orchestration failure so nothing is silently dropped.
    pub fn finish(mut self, started_at: DateTime<Utc>, cancelled: bool) -> Report {
        let mut counts = OutcomeCounts::default();
        let mut entries = Vec::with_capacity(self.order.len());

        for (reference, outcome) in self.order.into_iter().zip(self.outcomes) {
            let outcome = match outcome {
                Some(o) => o,
                None => {
                    let note = format!("no outcome recorded for {reference}");
                    warn!("{note}");
                    self.anomalies.push(note);
                    Outcome::orchestration_failure("pipeline produced no outcome")
                }
            };
            counts.add(outcome.kind());
            entries.push(ReportEntry { reference, outcome });
        }

        Report {
            meta: ReportMeta {
                started_at,
                finished_at: Utc::now(),
                total: entries.len(),
                cancelled,
                counts,
                anomalies: self.anomalies,
            },
            entries,
        }
    }

    /// Aggregate a finished stream of outcomes in one go.
    pub fn aggregate(
        outcomes: impl IntoIterator<Item = (RepositoryReference, Outcome)>,
        started_at: DateTime<Utc>,
    ) -> Report {
        let mut agg = Self::new();
        for (reference, outcome) in outcomes {
            agg.record(reference, outcome);
        }
        agg.finish(started_at, false)
    }

    fn slot_for(&mut self, reference: &RepositoryReference) -> usize {
        if let Some(&idx) = self.position.get(reference) {
            return idx;
        }
        let idx = self.order.len();
        self.order.push(reference.clone());
        self.outcomes.push(None);
        self.position.insert(reference.clone(), idx);
        idx
    }
}
