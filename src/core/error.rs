//! Error types for mod-warden
//!
//! Component-local recovery is preferred everywhere; these types cover the
//! few conditions that are reported back to a caller.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for mod-warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Errors that end the supervisor's run
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for WardenError {
    fn from(err: tokio::task::JoinError) -> Self {
        WardenError::Internal(format!("background task failed: {}", err))
    }
}

/// Errors reported synchronously by watcher registry mutation
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Watcher already registered: {path}")]
    Duplicate { path: PathBuf },

    #[error("Path is managed internally and cannot be watched: {path}")]
    Reserved { path: PathBuf },

    #[error("Invalid watch path: {path}")]
    InvalidPath { path: PathBuf },

    #[error("Failed to prepare watch path {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start watcher for {path}: {reason}")]
    WatchFailed { path: PathBuf, reason: String },

    #[error("Invalid build-output pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Child process errors
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to launch process {command}: {source}")]
    LaunchFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to prepare launch: {0}")]
    Prepare(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
