// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path, validate it, and resolve paths
/// relative to the file's directory.
///
/// - `[task].entry_point` is resolved when it names a relative path
///   (contains a separator); bare program names are left for `PATH` lookup.
/// - `[config].work_dir` is resolved when relative.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let raw_config = load_from_path(path)?;
    let mut config = ConfigFile::try_from(raw_config)?;

    let base = config_root_dir(path);
    if looks_like_relative_path(&config.task.entry_point) {
        config.task.entry_point = base
            .join(&config.task.entry_point)
            .to_string_lossy()
            .into_owned();
    }
    if config.config.work_dir.is_relative() {
        config.config.work_dir = base.join(&config.config.work_dir);
    }
    Ok(config)
}

/// Directory containing the config file, or the current directory for a
/// bare file name.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn looks_like_relative_path(entry_point: &str) -> bool {
    let path = Path::new(entry_point);
    path.is_relative() && path.components().count() > 1
}
