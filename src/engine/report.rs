// src/engine/report.rs

//! The final, complete mapping from reference to outcome for one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::outcome::{Outcome, OutcomeKind};
use crate::types::RepositoryReference;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub reference: RepositoryReference,
    pub outcome: Outcome,
}

/// Number of entries per outcome kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub graded: usize,
    pub fetch_failed: usize,
    pub run_failed: usize,
    pub timed_out: usize,
    pub crashed: usize,
    pub skipped: usize,
}

impl OutcomeCounts {
    pub fn add(&mut self, kind: OutcomeKind) {
        *self.slot(kind) += 1;
    }

    pub fn get(&self, kind: OutcomeKind) -> usize {
        match kind {
            OutcomeKind::Graded => self.graded,
            OutcomeKind::FetchFailed => self.fetch_failed,
            OutcomeKind::RunFailed => self.run_failed,
            OutcomeKind::TimedOut => self.timed_out,
            OutcomeKind::Crashed => self.crashed,
            OutcomeKind::Skipped => self.skipped,
        }
    }

    pub fn total(&self) -> usize {
        self.graded + self.fetch_failed + self.run_failed + self.timed_out + self.crashed + self.skipped
    }

    fn slot(&mut self, kind: OutcomeKind) -> &mut usize {
        match kind {
            OutcomeKind::Graded => &mut self.graded,
            OutcomeKind::FetchFailed => &mut self.fetch_failed,
            OutcomeKind::RunFailed => &mut self.run_failed,
            OutcomeKind::TimedOut => &mut self.timed_out,
            OutcomeKind::Crashed => &mut self.crashed,
            OutcomeKind::Skipped => &mut self.skipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMeta {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub cancelled: bool,
    pub counts: OutcomeCounts,
    /// Bookkeeping irregularities noticed while aggregating (duplicate or
    /// missing outcomes). Empty on a healthy run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anomalies: Vec<String>,
}

/// Entries are kept in submission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub meta: ReportMeta,
    pub entries: Vec<ReportEntry>,
}

impl Report {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, reference: &RepositoryReference) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|e| &e.reference == reference)
            .map(|e| &e.outcome)
    }

    /// Outcome for the first entry belonging to `student_id`.
    pub fn for_student(&self, student_id: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|e| e.reference.student_id == student_id)
            .map(|e| &e.outcome)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
