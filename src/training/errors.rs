//! Training error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::runtime::LayoutError;

/// Errors from training jobs, dataset scaffolding, and the adapter registry.
#[derive(Debug, Error)]
pub enum TrainingError {
    /// A job is already in flight on this runner.
    #[error("a training job is already running")]
    AlreadyRunning,

    /// The trainer is not installed in the private prefix.
    #[error("required executable '{name}' not found at {}; run bootstrap with repair", path.display())]
    MissingExecutable {
        name: String,
        path: PathBuf,
    },

    #[error("failed to launch trainer: {reason}")]
    SpawnFailed {
        reason: String,
    },

    /// Dataset names become directory names and must stay a single component.
    #[error("invalid dataset name '{name}'")]
    InvalidDatasetName {
        name: String,
    },

    /// Deletion target is not an artifact directory under the adapter root.
    #[error("{} is not an adapter directory", path.display())]
    NotAnAdapter {
        path: PathBuf,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

impl TrainingError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| TrainingError::Io { context, source }
    }
}
