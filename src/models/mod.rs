//! Model store: local model weights under the runtime root.

pub mod errors;
pub mod store;

pub use errors::StoreError;
pub use store::{compute_sha256, DownloadProgress, DownloadResult, ModelEntry, ModelStore};
