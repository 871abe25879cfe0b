// src/types.rs

//! Input types handed to the grading core by its external collaborators.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ProgradeError, Result};

/// Longest deadline a grading task (or a cancellation grace period) may ask
/// for.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Boxed future returned by the pluggable collaborators (fetcher, runner).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One student submission.
///
/// Immutable once created. Equality covers all three fields, so the same
/// location graded at two revisions (or for two students) is two references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryReference {
    /// Remote URL or local filesystem path.
    pub location: String,
    /// Branch, tag or commit; `None` means the remote's default HEAD.
    pub revision: Option<String>,
    /// Student or group identifier.
    pub student_id: String,
}

impl RepositoryReference {
    pub fn new(location: impl Into<String>, student_id: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            revision: None,
            student_id: student_id.into(),
        }
    }

    pub fn at_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }
}

impl fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.revision {
            Some(rev) => write!(f, "{} ({}@{})", self.student_id, self.location, rev),
            None => write!(f, "{} ({})", self.student_id, self.location),
        }
    }
}

/// Resource limits applied to the grading process by the kernel, plus the
/// capture bound applied by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// RLIMIT_CPU in seconds.
    #[serde(default)]
    pub cpu_seconds: Option<u64>,

    /// RLIMIT_AS in bytes.
    #[serde(default)]
    pub memory_bytes: Option<u64>,

    /// Maximum bytes kept per output stream (stdout and stderr separately).
    #[serde(default = "default_output_bytes")]
    pub output_bytes: usize,
}

fn default_output_bytes() -> usize {
    64 * 1024
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_seconds: None,
            memory_bytes: None,
            output_bytes: default_output_bytes(),
        }
    }
}

/// How the grading script reports its result on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// A JSON object carrying score and feedback fields.
    #[default]
    Json,
    /// A `## Marks` heading followed by `* Category: value` lines.
    Marks,
}

impl FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(PayloadFormat::Json),
            "marks" => Ok(PayloadFormat::Marks),
            other => Err(format!(
                "invalid payload format: {other} (expected \"json\" or \"marks\")"
            )),
        }
    }
}

/// Schema of the grading payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSpec {
    #[serde(default)]
    pub format: PayloadFormat,

    #[serde(default = "default_score_field")]
    pub score_field: String,

    #[serde(default = "default_feedback_field")]
    pub feedback_field: String,
}

fn default_score_field() -> String {
    "score".to_string()
}

fn default_feedback_field() -> String {
    "feedback".to_string()
}

impl Default for PayloadSpec {
    fn default() -> Self {
        Self {
            format: PayloadFormat::default(),
            score_field: default_score_field(),
            feedback_field: default_feedback_field(),
        }
    }
}

/// What to run against every snapshot. Read-only for the core.
///
/// `args` may contain the placeholders `{snapshot}`, `{student}` and
/// `{revision}`, substituted per pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingTask {
    pub entry_point: String,

    #[serde(default)]
    pub args: Vec<String>,

    pub timeout_seconds: f64,

    #[serde(default)]
    pub limits: ResourceLimits,

    #[serde(default)]
    pub payload: PayloadSpec,
}

impl GradingTask {
    pub fn new(entry_point: impl Into<String>, timeout: Duration) -> Self {
        Self {
            entry_point: entry_point.into(),
            args: Vec::new(),
            timeout_seconds: timeout.as_secs_f64(),
            limits: ResourceLimits::default(),
            payload: PayloadSpec::default(),
        }
    }

    /// Deadline for one run, clamped into `0..=MAX_TIMEOUT`.
    pub fn timeout(&self) -> Duration {
        seconds_to_duration(self.timeout_seconds).unwrap_or(if self.timeout_seconds > 0.0 {
            MAX_TIMEOUT
        } else {
            Duration::ZERO
        })
    }

    /// Reject tasks no pipeline could run. Called by the scheduler before
    /// anything is dispatched.
    pub fn validate(&self) -> Result<()> {
        if self.entry_point.trim().is_empty() {
            return Err(ProgradeError::InvalidTask(
                "entry_point must not be empty".to_string(),
            ));
        }
        if !self.timeout_seconds.is_finite() || self.timeout_seconds <= 0.0 {
            return Err(ProgradeError::InvalidTask(format!(
                "timeout_seconds must be a positive number (got {})",
                self.timeout_seconds
            )));
        }
        if seconds_to_duration(self.timeout_seconds).is_none() {
            return Err(ProgradeError::InvalidTask(format!(
                "timeout_seconds must not exceed {} (got {})",
                MAX_TIMEOUT.as_secs(),
                self.timeout_seconds
            )));
        }
        if self.limits.output_bytes == 0 {
            return Err(ProgradeError::InvalidTask(
                "limits.output_bytes must be >= 1".to_string(),
            ));
        }
        if matches!(self.limits.cpu_seconds, Some(0)) {
            return Err(ProgradeError::InvalidTask(
                "limits.cpu_seconds must be >= 1 when set".to_string(),
            ));
        }
        if matches!(self.limits.memory_bytes, Some(0)) {
            return Err(ProgradeError::InvalidTask(
                "limits.memory_bytes must be >= 1 when set".to_string(),
            ));
        }
        if self.payload.score_field.is_empty() || self.payload.feedback_field.is_empty() {
            return Err(ProgradeError::InvalidTask(
                "payload score_field and feedback_field must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Arguments with per-pipeline placeholders substituted.
    pub fn render_args(&self, snapshot: &Path, student: &str, revision: &str) -> Vec<String> {
        let snapshot = snapshot.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{snapshot}", &snapshot)
                    .replace("{student}", student)
                    .replace("{revision}", revision)
            })
            .collect()
    }
}

/// Convert a non-negative number of seconds into a `Duration` no longer than
/// [`MAX_TIMEOUT`]. `None` for NaN, negative or oversized values.
pub fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|d| *d <= MAX_TIMEOUT)
}
