// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::fetch::RetryPolicy;
use crate::types::{seconds_to_duration, GradingTask, PayloadSpec, RepositoryReference, ResourceLimits};

/// Configuration exactly as deserialized from TOML, before validation.
///
/// ```toml
/// [config]
/// concurrency = 4
/// base_url = "https://github.com/course-org"
///
/// [task]
/// entry_point = "./grade.sh"
/// timeout_seconds = 60
///
/// [[repo]]
/// student_id = "alice"
/// name = "alice-project"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub retry: RetrySection,

    pub task: TaskSection,

    #[serde(default)]
    pub payload: PayloadSpec,

    #[serde(default)]
    pub repo: Vec<RepoEntry>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`
/// (or [`ConfigFile::new_unchecked`] in tests).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub retry: RetrySection,
    pub task: TaskSection,
    pub payload: PayloadSpec,
    pub repo: Vec<RepoEntry>,
}

impl ConfigFile {
    /// Build a config without running validation.
    pub fn new_unchecked(
        config: ConfigSection,
        retry: RetrySection,
        task: TaskSection,
        payload: PayloadSpec,
        repo: Vec<RepoEntry>,
    ) -> Self {
        Self {
            config,
            retry,
            task,
            payload,
            repo,
        }
    }

    /// The grading task assembled from `[task]`, `[task.limits]` and `[payload]`.
    pub fn grading_task(&self) -> GradingTask {
        self.task.to_grading_task(&self.payload)
    }

    /// Repository references in file order.
    pub fn references(&self) -> Vec<RepositoryReference> {
        self.repo
            .iter()
            .map(|entry| entry.to_reference(self.config.base_url.as_deref()))
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.backoff_base_ms),
            Duration::from_millis(self.retry.backoff_max_ms),
        )
    }
}

/// `[config]` section: run-wide knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Upper bound on pipelines in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Parent directory of per-run snapshot workspaces.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Prefix for `[[repo]]` entries given by `name`.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_fetch_timeout_seconds")]
    pub fetch_timeout_seconds: u64,

    /// How long in-flight graders may keep running after a cancellation.
    #[serde(default = "default_cancel_grace_seconds")]
    pub cancel_grace_seconds: f64,
}

impl ConfigSection {
    /// Grace period as a `Duration`; out-of-range values fall back to the
    /// default, which validation never lets through.
    pub fn cancel_grace(&self) -> Duration {
        seconds_to_duration(self.cancel_grace_seconds)
            .unwrap_or(Duration::from_secs_f64(default_cancel_grace_seconds()))
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".prograde")
}

fn default_fetch_timeout_seconds() -> u64 {
    120
}

fn default_cancel_grace_seconds() -> f64 {
    2.0
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            work_dir: default_work_dir(),
            base_url: None,
            fetch_timeout_seconds: default_fetch_timeout_seconds(),
            cancel_grace_seconds: default_cancel_grace_seconds(),
        }
    }
}

/// `[retry]` section. Applies to `NetworkFailure` only.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    8000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// `[task]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSection {
    /// Grader executable. Relative paths are resolved against the config
    /// file's directory by the loader.
    pub entry_point: String,

    /// May contain `{snapshot}`, `{student}` and `{revision}`.
    #[serde(default)]
    pub args: Vec<String>,

    pub timeout_seconds: f64,

    #[serde(default)]
    pub limits: ResourceLimits,
}

impl TaskSection {
    pub fn to_grading_task(&self, payload: &PayloadSpec) -> GradingTask {
        GradingTask {
            entry_point: self.entry_point.clone(),
            args: self.args.clone(),
            timeout_seconds: self.timeout_seconds,
            limits: self.limits.clone(),
            payload: payload.clone(),
        }
    }
}

/// One `[[repo]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoEntry {
    pub student_id: String,

    /// Full URL or local path.
    #[serde(default)]
    pub location: Option<String>,

    /// Repository name joined onto `[config].base_url`.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub revision: Option<String>,
}

impl RepoEntry {
    /// Validation guarantees exactly one of `location`/`name`, and a
    /// `base_url` whenever `name` is used.
    pub fn to_reference(&self, base_url: Option<&str>) -> RepositoryReference {
        let location = match (&self.location, &self.name, base_url) {
            (Some(location), _, _) => location.clone(),
            (None, Some(name), Some(base)) => join_url(base, name),
            (None, Some(name), None) => name.clone(),
            (None, None, _) => String::new(),
        };
        RepositoryReference {
            location,
            revision: self.revision.clone(),
            student_id: self.student_id.clone(),
        }
    }
}

fn join_url(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name.trim_start_matches('/'))
}
