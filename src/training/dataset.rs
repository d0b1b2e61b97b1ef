//! Dataset scaffolding for new training sets.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use super::errors::TrainingError;
use super::types::DatasetFormat;

const TRAIN_FILE: &str = "train.jsonl";
const VALID_FILE: &str = "valid.jsonl";
const README_FILE: &str = "README.md";

/// Create `<root>/<name>` with seed `train.jsonl`/`valid.jsonl` files.
///
/// Seed files are only written when absent, so a dataset the user has filled
/// in is never clobbered. The README is rewritten on every call.
pub fn create_dataset_scaffold(
    root: &Path,
    name: &str,
    format: DatasetFormat,
) -> Result<PathBuf, TrainingError> {
    validate_name(name)?;

    let dir = root.join(name);
    std::fs::create_dir_all(&dir)
        .map_err(TrainingError::io(format!("failed to create {}", dir.display())))?;

    for (file, rows) in [(TRAIN_FILE, seed_rows(format)), (VALID_FILE, seed_rows(format))] {
        let path = dir.join(file);
        if path.exists() {
            tracing::debug!(path = %path.display(), "dataset file present, leaving as is");
            continue;
        }
        let mut body = String::new();
        for row in rows {
            body.push_str(&row.to_string());
            body.push('\n');
        }
        std::fs::write(&path, body)
            .map_err(TrainingError::io(format!("failed to write {}", path.display())))?;
    }

    let readme = dir.join(README_FILE);
    std::fs::write(&readme, readme_text(name, format))
        .map_err(TrainingError::io(format!("failed to write {}", readme.display())))?;

    tracing::info!(dataset = name, format = format.as_str(), path = %dir.display(), "dataset scaffold ready");
    Ok(dir)
}

fn validate_name(name: &str) -> Result<(), TrainingError> {
    let trimmed = name.trim();
    let bad = trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed != name
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if bad {
        return Err(TrainingError::InvalidDatasetName { name: name.to_string() });
    }
    Ok(())
}

fn seed_rows(format: DatasetFormat) -> Vec<Value> {
    match format {
        DatasetFormat::Chat => vec![
            json!({"messages": [
                {"role": "system", "content": "You are a helpful assistant."},
                {"role": "user", "content": "What is the capital of France?"},
                {"role": "assistant", "content": "The capital of France is Paris."}
            ]}),
            json!({"messages": [
                {"role": "user", "content": "Summarize: the meeting moved to Thursday."},
                {"role": "assistant", "content": "The meeting is now on Thursday."}
            ]}),
        ],
        DatasetFormat::Completions => vec![
            json!({"prompt": "What is the capital of France?", "completion": "Paris."}),
            json!({"prompt": "Translate 'thank you' to Spanish.", "completion": "Gracias."}),
        ],
        DatasetFormat::Text => vec![
            json!({"text": "The capital of France is Paris."}),
            json!({"text": "Water boils at 100 degrees Celsius at sea level."}),
        ],
    }
}

fn readme_text(name: &str, format: DatasetFormat) -> String {
    let shape = match format {
        DatasetFormat::Chat => r#"{"messages": [{"role": "user", "content": "..."}, {"role": "assistant", "content": "..."}]}"#,
        DatasetFormat::Completions => r#"{"prompt": "...", "completion": "..."}"#,
        DatasetFormat::Text => r#"{"text": "..."}"#,
    };
    format!(
        "# {name}\n\n\
         Format: `{format}`\n\n\
         Put one JSON object per line in `{TRAIN_FILE}` (training) and `{VALID_FILE}` (validation).\n\
         Each line looks like:\n\n\
         ```json\n{shape}\n```\n\n\
         Existing data files are never overwritten when this scaffold is refreshed.\n",
        format = format.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scaffold_seeds_files() {
        let tmp = TempDir::new().unwrap();
        let dir = create_dataset_scaffold(tmp.path(), "my-set", DatasetFormat::Completions).unwrap();

        let train = std::fs::read_to_string(dir.join(TRAIN_FILE)).unwrap();
        for line in train.lines() {
            let row: Value = serde_json::from_str(line).unwrap();
            assert!(row.get("prompt").is_some());
            assert!(row.get("completion").is_some());
        }
        assert!(dir.join(VALID_FILE).exists());
        assert!(std::fs::read_to_string(dir.join(README_FILE)).unwrap().contains("completions"));
    }

    #[test]
    fn test_rerun_keeps_data_and_refreshes_readme() {
        let tmp = TempDir::new().unwrap();
        let dir = create_dataset_scaffold(tmp.path(), "my-set", DatasetFormat::Chat).unwrap();

        let custom = "{\"messages\":[{\"role\":\"user\",\"content\":\"mine\"}]}\n";
        std::fs::write(dir.join(TRAIN_FILE), custom).unwrap();
        std::fs::write(dir.join(README_FILE), "stale").unwrap();

        let again = create_dataset_scaffold(tmp.path(), "my-set", DatasetFormat::Chat).unwrap();
        assert_eq!(again, dir);
        assert_eq!(std::fs::read_to_string(dir.join(TRAIN_FILE)).unwrap(), custom);
        let readme = std::fs::read_to_string(dir.join(README_FILE)).unwrap();
        assert!(readme.starts_with("# my-set"));
    }

    #[test]
    fn test_rejects_path_like_names() {
        let tmp = TempDir::new().unwrap();
        for name in ["", " ", ".", "..", "a/b", "..\\x", " padded"] {
            let err = create_dataset_scaffold(tmp.path(), name, DatasetFormat::Text).unwrap_err();
            assert!(matches!(err, TrainingError::InvalidDatasetName { .. }), "{name:?}");
        }
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
