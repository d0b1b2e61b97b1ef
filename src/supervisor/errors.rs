//! Process supervisor error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::runtime::LayoutError;

/// Errors from starting or stopping the inference server.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The server executable is not installed in the private prefix.
    #[error("required executable '{name}' not found at {}; run bootstrap with repair", path.display())]
    MissingExecutable {
        name: String,
        path: PathBuf,
    },

    /// The OS refused to launch the server process.
    #[error("failed to launch inference server: {reason}")]
    SpawnFailed {
        reason: String,
    },

    /// The loopback HTTP client used for health checks could not be built.
    #[error("failed to build HTTP client: {reason}")]
    HttpClient {
        reason: String,
    },

    /// The server was launched but never answered its health path.
    #[error("inference server at {url} not ready after {timeout_ms}ms")]
    ReadinessTimeout {
        url: String,
        timeout_ms: u64,
    },

    /// Filesystem or process I/O failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

impl SupervisorError {
    /// True when the process started but never became healthy.
    pub fn is_readiness_timeout(&self) -> bool {
        matches!(self, SupervisorError::ReadinessTimeout { .. })
    }
}
