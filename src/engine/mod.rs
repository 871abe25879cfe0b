// src/engine/mod.rs

//! Orchestration engine for prograde.
//!
//! - [`scheduler`] fans references out over a bounded set of pipelines
//! - [`aggregator`] merges their outcomes, one at a time, into a [`Report`]
//! - [`cancel`] carries run-wide cancellation to every pipeline

pub mod aggregator;
pub mod cancel;
pub mod report;
pub mod scheduler;

pub use aggregator::ResultAggregator;
pub use cancel::{CancelHandle, CancelSignal};
pub use report::{OutcomeCounts, Report, ReportEntry, ReportMeta};
pub use scheduler::Scheduler;
