//! Error taxonomy for the experiment runner

use std::path::PathBuf;

/// Errors raised by the runner library.
///
/// Only [`RunnerError::Config`] and a workload [`RunnerError::ProcessSpawn`]
/// end a run early; every other variant is local to the collector or
/// metric source it came from.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Invalid or incomplete configuration, detected at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A collector with the same name is already registered.
    #[error("collector '{0}' is already registered")]
    DuplicateName(String),

    /// A collector or the workload could not be started.
    #[error("failed to spawn {unit}: {source}")]
    ProcessSpawn {
        unit: String,
        #[source]
        source: std::io::Error,
    },

    /// The counter source has no line for the requested device.
    #[error("device '{device}' not found in {}", path.display())]
    DeviceNotFound { device: String, path: PathBuf },

    /// A record could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Transport-level failure talking to the wattmeter API.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The wattmeter API answered with a non-2xx status.
    #[error("wattmeter API HTTP error: status={status}, body={body}")]
    Http { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunnerError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RunnerError::Network(_) => true,
            RunnerError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, RunnerError>;
