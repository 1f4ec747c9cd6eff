// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("Cycle detected: {0}")]
    Cycle(String),

    /// The scheduler refused or could not accept a job. Fatal to the manager.
    #[error("Job submission failed: {0}")]
    Submission(String),

    /// A status, cancel or priority call against the scheduler failed.
    /// Callers retry on the next poll.
    #[error("Scheduler backend error: {0}")]
    Backend(String),

    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("Unknown run: {0}")]
    UnknownRun(u64),

    #[error("Unknown dataset: {0}")]
    UnknownDataset(u64),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FleetError {
    /// Submission errors bring the manager down; everything else is recorded
    /// on the affected run or retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FleetError::Submission(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FleetError>;
