//! Model store: downloads, verification and deletion of model weights.
//!
//! Each model lives in `<root>/models/<model>/`. Downloads stream into
//! `<file>.part` and are renamed into place only once complete, so a
//! half-downloaded file never looks like a usable model.

use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::StreamExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::errors::StoreError;

/// Minimum spacing between progress callbacks.
const PROGRESS_INTERVAL_MS: u128 = 100;

/// Progress update passed to the download callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    /// 0 when the server sent no content length.
    pub bytes_total: u64,
    pub percent: f64,
    pub speed_mbps: f64,
    pub eta_seconds: u64,
}

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
}

/// A model directory under the store root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

pub struct ModelStore {
    root: PathBuf,
    client: reqwest::Client,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StoreError::Http {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { root, client })
    }

    pub fn with_client(root: impl Into<PathBuf>, client: reqwest::Client) -> Self {
        Self {
            root: root.into(),
            client,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a model, after validating its name.
    pub fn model_dir(&self, model_name: &str) -> Result<PathBuf, StoreError> {
        validate_component(model_name)?;
        Ok(self.root.join(model_name))
    }

    /// Stream `url` into the model's directory and hash the result.
    ///
    /// The file name is the last segment of the URL path. `on_progress` is
    /// called at most every 100 ms and once more when the transfer completes.
    pub async fn download<F>(
        &self,
        url: &str,
        model_name: &str,
        mut on_progress: F,
    ) -> Result<DownloadResult, StoreError>
    where
        F: FnMut(&DownloadProgress),
    {
        let dir = self.model_dir(model_name)?;
        let filename = file_name_from_url(url)?;
        let target = dir.join(&filename);
        let partial = dir.join(format!("{filename}.part"));

        let http_err = |reason: String| StoreError::Http {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| http_err(format!("failed to start download: {e}")))?;
        if !response.status().is_success() {
            return Err(http_err(format!("status {}", response.status())));
        }
        let bytes_total = response.content_length().unwrap_or(0);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(StoreError::io(format!("failed to create {}", dir.display())))?;

        tracing::info!(url, model = model_name, bytes_total, "model download started");

        let streamed = stream_to_file(response, &partial, bytes_total, &mut on_progress).await;
        let (size_bytes, sha256) = match streamed {
            Ok(done) => done,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(match e {
                    StreamFailure::Http(reason) => http_err(reason),
                    StreamFailure::Store(e) => e,
                });
            }
        };

        tokio::fs::rename(&partial, &target)
            .await
            .map_err(StoreError::io(format!("failed to move download into {}", target.display())))?;

        tracing::info!(path = %target.display(), size_bytes, sha256 = %sha256, "model download complete");
        Ok(DownloadResult {
            path: target,
            size_bytes,
            sha256,
        })
    }

    /// Compare a file's SHA-256 with `expected` (hex, case-insensitive).
    pub async fn verify(&self, path: &Path, expected_sha256: &str) -> Result<bool, StoreError> {
        if !path.is_file() {
            return Err(StoreError::NotFound { path: path.to_path_buf() });
        }
        let actual = compute_sha256(path).await?;
        Ok(actual.eq_ignore_ascii_case(expected_sha256.trim()))
    }

    /// Installed models, sorted by name. A missing root is an empty store.
    pub fn list(&self) -> Result<Vec<ModelEntry>, StoreError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(format!("failed to read {}", self.root.display()))(e)),
        };

        let mut models: Vec<ModelEntry> = entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .map(|entry| {
                let path = entry.path();
                ModelEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size_bytes: dir_size(&path),
                    path,
                }
            })
            .collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }

    /// Remove a model directory and everything in it.
    pub fn delete(&self, model_name: &str) -> Result<(), StoreError> {
        let dir = self.model_dir(model_name)?;
        if !dir.is_dir() {
            return Err(StoreError::NotFound { path: dir });
        }
        std::fs::remove_dir_all(&dir)
            .map_err(StoreError::io(format!("failed to delete {}", dir.display())))?;
        tracing::info!(model = model_name, path = %dir.display(), "model deleted");
        Ok(())
    }
}

enum StreamFailure {
    Http(String),
    Store(StoreError),
}

/// Write the body to `path`, hashing as it goes. Returns (bytes, sha256).
async fn stream_to_file<F>(
    response: reqwest::Response,
    path: &Path,
    bytes_total: u64,
    on_progress: &mut F,
) -> Result<(u64, String), StreamFailure>
where
    F: FnMut(&DownloadProgress),
{
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| StreamFailure::Store(StoreError::io(format!("failed to create {}", path.display()))(e)))?;

    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();
    let mut bytes_downloaded: u64 = 0;
    let start_time = Instant::now();
    let mut last_emit = Instant::now();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| StreamFailure::Http(format!("stream error: {e}")))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| StreamFailure::Store(StoreError::io("failed to write chunk")(e)))?;
        hasher.update(&chunk);
        bytes_downloaded += chunk.len() as u64;

        if last_emit.elapsed().as_millis() >= PROGRESS_INTERVAL_MS {
            on_progress(&progress(bytes_downloaded, bytes_total, start_time));
            last_emit = Instant::now();
        }
    }

    file.flush()
        .await
        .map_err(|e| StreamFailure::Store(StoreError::io("failed to flush download")(e)))?;
    on_progress(&progress(bytes_downloaded, bytes_total, start_time));

    Ok((bytes_downloaded, format!("{:x}", hasher.finalize())))
}

fn progress(bytes_downloaded: u64, bytes_total: u64, start_time: Instant) -> DownloadProgress {
    let elapsed_secs = start_time.elapsed().as_secs_f64();
    let speed_mbps = if elapsed_secs > 0.0 {
        (bytes_downloaded as f64 / (1024.0 * 1024.0)) / elapsed_secs
    } else {
        0.0
    };
    let percent = if bytes_total > 0 {
        (bytes_downloaded as f64 / bytes_total as f64) * 100.0
    } else {
        0.0
    };
    let eta_seconds = if speed_mbps > 0.0 && bytes_total > bytes_downloaded {
        let remaining_mb = (bytes_total - bytes_downloaded) as f64 / (1024.0 * 1024.0);
        (remaining_mb / speed_mbps) as u64
    } else {
        0
    };

    DownloadProgress {
        bytes_downloaded,
        bytes_total,
        percent: (percent * 10.0).round() / 10.0,
        speed_mbps: (speed_mbps * 100.0).round() / 100.0,
        eta_seconds,
    }
}

/// SHA-256 of a file, read in 8 KB chunks.
pub async fn compute_sha256(path: &Path) -> Result<String, StoreError> {
    let context = || format!("failed to hash {}", path.display());
    let mut file = tokio::fs::File::open(path).await.map_err(StoreError::io(context()))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];
    loop {
        let read = file.read(&mut buffer).await.map_err(StoreError::io(context()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn file_name_from_url(url: &str) -> Result<String, StoreError> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or_default();
    validate_component(name)?;
    Ok(name.to_string())
}

fn validate_component(name: &str) -> Result<(), StoreError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.trim() != name
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(StoreError::InvalidName { name: name.to_string() });
    }
    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(ft) if ft.is_dir() => dir_size(&entry.path()),
            Ok(_) => entry.metadata().map(|m| m.len()).unwrap_or(0),
            Err(_) => 0,
        })
        .sum()
}
