//! Model store error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport failure or non-success status while downloading.
    #[error("download from {url} failed: {reason}")]
    Http {
        url: String,
        reason: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not found: {}", path.display())]
    NotFound {
        path: PathBuf,
    },

    /// Model and file names must be a single plain path component.
    #[error("invalid model name '{name}'")]
    InvalidName {
        name: String,
    },
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| StoreError::Io { context, source }
    }
}
