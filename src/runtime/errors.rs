//! Runtime layout error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving or materialising the runtime root.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// No usable base directory could be determined for the runtime root.
    #[error("cannot resolve runtime root: {reason}")]
    Unresolvable {
        reason: String,
    },

    /// A directory under the runtime root could not be created.
    #[error("failed to create {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
