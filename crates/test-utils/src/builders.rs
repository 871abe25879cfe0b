#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use prograde::config::{ConfigFile, ConfigSection, RawConfigFile, RepoEntry, RetrySection, TaskSection};
use prograde::types::{
    GradingTask, PayloadFormat, PayloadSpec, RepositoryReference, ResourceLimits,
};

/// Builder for `GradingTask`.
pub struct TaskBuilder {
    task: GradingTask,
}

impl TaskBuilder {
    pub fn new(entry_point: impl Into<String>) -> Self {
        Self {
            task: GradingTask::new(entry_point, Duration::from_secs(10)),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.task.timeout_seconds = timeout.as_secs_f64();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.task.args.push(arg.into());
        self
    }

    pub fn output_bytes(mut self, bytes: usize) -> Self {
        self.task.limits.output_bytes = bytes;
        self
    }

    pub fn cpu_seconds(mut self, secs: u64) -> Self {
        self.task.limits.cpu_seconds = Some(secs);
        self
    }

    pub fn memory_bytes(mut self, bytes: u64) -> Self {
        self.task.limits.memory_bytes = Some(bytes);
        self
    }

    pub fn payload_format(mut self, format: PayloadFormat) -> Self {
        self.task.payload.format = format;
        self
    }

    pub fn build(self) -> GradingTask {
        self.task
    }
}

/// Builder for `RepositoryReference`.
pub struct ReferenceBuilder {
    reference: RepositoryReference,
}

impl ReferenceBuilder {
    pub fn new(student_id: &str) -> Self {
        Self {
            reference: RepositoryReference::new(format!("fake://{student_id}"), student_id),
        }
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.reference.location = location.into();
        self
    }

    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.reference.revision = Some(revision.into());
        self
    }

    pub fn build(self) -> RepositoryReference {
        self.reference
    }
}

/// `count` distinct references `student-0000`, `student-0001`, ...
pub fn references(count: usize) -> Vec<RepositoryReference> {
    (0..count)
        .map(|i| ReferenceBuilder::new(&format!("student-{i:04}")).build())
        .collect()
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(entry_point: &str) -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                retry: RetrySection::default(),
                task: TaskSection {
                    entry_point: entry_point.to_string(),
                    args: Vec::new(),
                    timeout_seconds: 10.0,
                    limits: ResourceLimits::default(),
                },
                payload: PayloadSpec::default(),
                repo: Vec::new(),
            },
        }
    }

    pub fn with_repo(mut self, student_id: &str, location: &str) -> Self {
        self.config.repo.push(RepoEntry {
            student_id: student_id.to_string(),
            location: Some(location.to_string()),
            name: None,
            revision: None,
        });
        self
    }

    pub fn with_named_repo(mut self, student_id: &str, name: &str) -> Self {
        self.config.repo.push(RepoEntry {
            student_id: student_id.to_string(),
            location: None,
            name: Some(name.to_string()),
            revision: None,
        });
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.config.base_url = Some(base_url.to_string());
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.config.concurrency = concurrency;
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.config.config.work_dir = work_dir.into();
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}
