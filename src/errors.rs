// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! `ProgradeError` is reserved for caller contract violations that surface
//! before any pipeline starts. Failures while grading a repository are never
//! returned as errors; they are folded into an [`crate::outcome::Outcome`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProgradeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid grading task: {0}")]
    InvalidTask(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ProgradeError>;
