//! Errors surfaced by the simulation engine.

use std::path::PathBuf;

use crate::types::ProcessId;

/// Rejected engine operations.
#[derive(Debug)]
pub enum SimError {
    /// `start_simulation` was called before a threading model was selected.
    ModelNotSet,
    /// `start_simulation` was called while a run is in flight.
    AlreadyRunning,
    /// No process with this id exists in the session.
    UnknownProcess(ProcessId),
    /// The control context could not be spawned.
    Spawn(std::io::Error),
    /// A configuration value is out of range or unknown.
    InvalidConfig(String),
    /// Reading or writing a file failed.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// JSON serialization failed.
    Json(serde_json::Error),
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimError::ModelNotSet => write!(f, "no threading model selected"),
            SimError::AlreadyRunning => write!(f, "a simulation is already running"),
            SimError::UnknownProcess(id) => write!(f, "unknown process {id}"),
            SimError::Spawn(e) => write!(f, "failed to spawn simulation thread: {e}"),
            SimError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            SimError::Io { path, source } => write!(f, "{}: {source}", path.display()),
            SimError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for SimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimError::Io { source, .. } | SimError::Spawn(source) => Some(source),
            SimError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SimError {
    fn from(e: serde_json::Error) -> Self {
        SimError::Json(e)
    }
}
