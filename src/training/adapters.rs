//! Adapter registry: trained artifacts under the adapters root.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};

use super::errors::TrainingError;
use super::types::{AdapterInfo, ArtifactMetadata, METADATA_FILE};

/// Files whose presence marks a directory as a usable adapter.
const ADAPTER_MARKERS: [&str; 2] = ["adapter_config.json", "adapters.safetensors"];

pub struct AdapterRegistry {
    root: PathBuf,
}

impl AdapterRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All adapters, newest first. A missing root is an empty registry.
    pub fn list(&self) -> Result<Vec<AdapterInfo>, TrainingError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(TrainingError::io(format!("failed to read {}", self.root.display()))(e))
            }
        };

        let mut adapters: Vec<AdapterInfo> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| is_adapter_dir(path))
            .map(|path| describe(&path))
            .collect();

        adapters.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(adapters)
    }

    /// Remove an adapter directory. Only direct children of the root qualify.
    pub fn delete(&self, path: &Path) -> Result<(), TrainingError> {
        let not_adapter = || TrainingError::NotAnAdapter { path: path.to_path_buf() };

        let root = self.root.canonicalize().map_err(|_| not_adapter())?;
        let target = path.canonicalize().map_err(|_| not_adapter())?;
        if target.parent() != Some(root.as_path()) || !target.is_dir() {
            return Err(not_adapter());
        }

        std::fs::remove_dir_all(&target)
            .map_err(TrainingError::io(format!("failed to delete {}", target.display())))?;
        tracing::info!(path = %target.display(), "adapter deleted");
        Ok(())
    }
}

fn is_adapter_dir(path: &Path) -> bool {
    path.is_dir() && ADAPTER_MARKERS.iter().any(|m| path.join(m).is_file())
}

fn describe(path: &Path) -> AdapterInfo {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let metadata = std::fs::read_to_string(path.join(METADATA_FILE))
        .ok()
        .and_then(|raw| serde_json::from_str::<ArtifactMetadata>(&raw).ok());

    match metadata {
        Some(meta) => AdapterInfo {
            name,
            path: path.to_path_buf(),
            model_id: Some(meta.model_id),
            created_at: meta.created_at,
        },
        None => {
            tracing::debug!(path = %path.display(), "adapter metadata missing, using filesystem time");
            AdapterInfo {
                name,
                path: path.to_path_buf(),
                model_id: None,
                created_at: filesystem_time(path),
            }
        }
    }
}

fn filesystem_time(path: &Path) -> DateTime<Utc> {
    let time = std::fs::metadata(path)
        .ok()
        .and_then(|m| m.created().or_else(|_| m.modified()).ok())
        .unwrap_or(UNIX_EPOCH);
    DateTime::<Utc>::from(time)
}
