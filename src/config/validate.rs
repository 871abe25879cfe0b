// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{ProgradeError, Result};
use crate::types::{seconds_to_duration, MAX_TIMEOUT};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ProgradeError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(
            raw.config,
            raw.retry,
            raw.task,
            raw.payload,
            raw.repo,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_repos(cfg)?;
    validate_global_config(cfg)?;
    validate_repo_entries(cfg)?;
    validate_unique_students(cfg)?;
    cfg.task
        .to_grading_task(&cfg.payload)
        .validate()
        .map_err(|e| ProgradeError::ConfigError(format!("[task]: {e}")))?;
    Ok(())
}

fn ensure_has_repos(cfg: &RawConfigFile) -> Result<()> {
    if cfg.repo.is_empty() {
        return Err(ProgradeError::ConfigError(
            "config must contain at least one [[repo]] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.concurrency == 0 {
        return Err(ProgradeError::ConfigError(
            "[config].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.fetch_timeout_seconds == 0 {
        return Err(ProgradeError::ConfigError(
            "[config].fetch_timeout_seconds must be >= 1 (got 0)".to_string(),
        ));
    }
    let grace = cfg.config.cancel_grace_seconds;
    if seconds_to_duration(grace).is_none() {
        return Err(ProgradeError::ConfigError(format!(
            "[config].cancel_grace_seconds must be between 0 and {} (got {grace})",
            MAX_TIMEOUT.as_secs()
        )));
    }
    if cfg.retry.backoff_base_ms > cfg.retry.backoff_max_ms {
        return Err(ProgradeError::ConfigError(format!(
            "[retry].backoff_base_ms ({}) must not exceed backoff_max_ms ({})",
            cfg.retry.backoff_base_ms, cfg.retry.backoff_max_ms
        )));
    }
    Ok(())
}

fn validate_repo_entries(cfg: &RawConfigFile) -> Result<()> {
    for (idx, entry) in cfg.repo.iter().enumerate() {
        if entry.student_id.trim().is_empty() {
            return Err(ProgradeError::ConfigError(format!(
                "[[repo]] entry #{} has an empty student_id",
                idx + 1
            )));
        }
        match (&entry.location, &entry.name) {
            (Some(_), Some(_)) => {
                return Err(ProgradeError::ConfigError(format!(
                    "repo for '{}' sets both `location` and `name`; use one",
                    entry.student_id
                )));
            }
            (None, None) => {
                return Err(ProgradeError::ConfigError(format!(
                    "repo for '{}' needs either `location` or `name`",
                    entry.student_id
                )));
            }
            (Some(location), None) if location.trim().is_empty() => {
                return Err(ProgradeError::ConfigError(format!(
                    "repo for '{}' has an empty `location`",
                    entry.student_id
                )));
            }
            (None, Some(_)) if cfg.config.base_url.is_none() => {
                return Err(ProgradeError::ConfigError(format!(
                    "repo for '{}' uses `name` but [config].base_url is not set",
                    entry.student_id
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Two entries for the same student mean overlapping projects.
fn validate_unique_students(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in &cfg.repo {
        if !seen.insert(entry.student_id.as_str()) {
            return Err(ProgradeError::ConfigError(format!(
                "student '{}' appears in more than one [[repo]] entry",
                entry.student_id
            )));
        }
    }
    Ok(())
}
