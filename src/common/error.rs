//! Error types for minivol

use crate::replica::State;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Metadata Errors ===
    #[error("Replica metadata not found in {}", .0.display())]
    MetadataNotFound(PathBuf),

    #[error("Failed to read replica metadata in {}: {reason}", .path.display())]
    MetadataRead { path: PathBuf, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Lifecycle Errors ===
    #[error("Replica is already open")]
    AlreadyOpen,

    #[error("Can not set rebuilding={rebuilding} from state {state}")]
    InvalidTransition { rebuilding: bool, state: State },

    #[error("Volume no longer exists")]
    NotAvailable,

    #[error("ping failure: replica state {0}")]
    PingFailure(State),

    #[error("Action notifier closed")]
    NotifierClosed,

    // === Engine Errors ===
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Does this error mean the metadata simply isn't there yet?
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::MetadataNotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Can an orchestrator retry the same call without operator action?
    ///
    /// Engine and I/O failures leave the coordinator's handle untouched, so
    /// the call can be reissued. Lifecycle errors need a different call first,
    /// and a closed notifier stays closed for the life of the process.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Engine(_)) && !self.is_not_found()
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Engine(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Engine(s)
    }
}
