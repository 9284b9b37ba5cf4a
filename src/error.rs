//! Error types for outreach-controller

use thiserror::Error;

/// Failures reading or writing the persisted ledger, queue, or schedule.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Data directory is locked by another process ({path})")]
    Locked { path: String },
}

impl StorageError {
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid start_time '{0}': expected YYYY-MM-DD HH:MM or YYYY-MM-DD")]
    StartTime(String),

    #[error("Invalid schedule: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
