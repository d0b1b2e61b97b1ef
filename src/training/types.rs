//! Shared types for training jobs and their artifacts.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata file written into every artifact directory before launch.
pub const METADATA_FILE: &str = "adapter_meta.json";

/// Parameters for one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRequest {
    /// Catalog identifier of the base model (e.g. "mlx-community/Qwen2.5-0.5B").
    pub model_id: String,
    /// Local path of the base model weights.
    pub model_path: PathBuf,
    /// Directory containing `train.jsonl` / `valid.jsonl`.
    pub dataset_path: PathBuf,
    pub iterations: u32,
    pub learning_rate: f64,
    pub batch_size: u32,
}

/// Result of a finished (or cancelled) run. Non-zero exit is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingOutcome {
    pub exit_code: i32,
    /// Full stdout followed by full stderr.
    pub log: String,
    pub artifact_dir: PathBuf,
}

impl TrainingOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Contents of [`METADATA_FILE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

/// Externally visible runner phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    Idle,
    Running,
    Cancelling,
}

/// A trained adapter discovered under the artifact root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterInfo {
    pub name: String,
    pub path: PathBuf,
    /// Base model the adapter was trained from, when metadata is readable.
    pub model_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Layout of the seeded training file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFormat {
    /// `{"messages": [{role, content}, ...]}`
    Chat,
    /// `{"prompt": ..., "completion": ...}`
    Completions,
    /// `{"text": ...}`
    Text,
}

impl DatasetFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DatasetFormat::Chat => "chat",
            DatasetFormat::Completions => "completions",
            DatasetFormat::Text => "text",
        }
    }
}

impl FromStr for DatasetFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(DatasetFormat::Chat),
            "completions" | "completion" => Ok(DatasetFormat::Completions),
            "text" => Ok(DatasetFormat::Text),
            other => Err(format!("unknown dataset format '{other}' (expected chat, completions, or text)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_format_parse() {
        assert_eq!("Chat".parse::<DatasetFormat>().unwrap(), DatasetFormat::Chat);
        assert_eq!("completion".parse::<DatasetFormat>().unwrap(), DatasetFormat::Completions);
        assert!("csv".parse::<DatasetFormat>().is_err());
    }

    #[test]
    fn test_metadata_wire_format() {
        let meta: ArtifactMetadata =
            serde_json::from_str(r#"{"modelId":"org/model","createdAt":"2026-03-01T10:00:00Z"}"#).unwrap();
        assert_eq!(meta.model_id, "org/model");
    }
}
