// ABOUTME: Application-wide error types for berth.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("host configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Execution(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing setting, out-of-range parameter, bad pattern.
    Configuration,
    /// Process launch/wait/signal failure, timeout, state conflict.
    Execution,
    /// Invariant violation, illegal transition, commit failure.
    Transaction,
    /// Collaborator-reported failure (artifact store, overlay repo, probe).
    Repository,
}

impl Error {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigNotFound(_) | Error::Config(_) | Error::Yaml(_) => {
                ErrorKind::Configuration
            }
            Error::Execution(_) | Error::Io(_) | Error::Json(_) => ErrorKind::Execution,
            Error::Transaction(_) => ErrorKind::Transaction,
            Error::Repository(_) => ErrorKind::Repository,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
