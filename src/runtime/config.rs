//! Runtime settings loading.
//!
//! Reads `<root>/config.yaml` and resolves environment variables before
//! parsing. A leading `~` is expanded only inside `${VAR:-default}`
//! fallbacks; no setting is a filesystem path, so literal values are kept
//! verbatim. Every field has a default, so a missing or partial file is fine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::layout::RuntimeLayout;

// ─── Public Types ────────────────────────────────────────────────────────────

/// Inference-server launch and readiness settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Path polled after launch; any 2xx means ready.
    pub health_path: String,
    pub readiness_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            health_path: "/v1/models".to_string(),
            readiness_timeout_secs: 30,
            poll_interval_ms: 300,
        }
    }
}

impl ServerSettings {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Local endpoint discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub host: String,
    pub ports: Vec<u16>,
    pub paths: Vec<String>,
    pub probe_timeout_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            ports: vec![1234, 8000, 8080, 11434],
            paths: vec![
                "/v1/models".to_string(),
                "/api/tags".to_string(),
                "/health".to_string(),
            ],
            probe_timeout_ms: 800,
        }
    }
}

/// Tool bootstrap settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSettings {
    /// Packages installed into the private environment.
    pub packages: Vec<String>,
    pub recommendation_cli: String,
    pub recommendation_formula: String,
    /// Candidate speech CLI names, checked in order.
    pub speech_candidates: Vec<String>,
    pub speech_formula: String,
    pub package_manager: String,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            packages: vec!["mlx-lm".to_string()],
            recommendation_cli: "llmfit".to_string(),
            recommendation_formula: "llmfit".to_string(),
            speech_candidates: vec![
                "whisper-cli".to_string(),
                "whisper-cpp".to_string(),
                "whisper".to_string(),
            ],
            speech_formula: "whisper-cpp".to_string(),
            package_manager: "brew".to_string(),
        }
    }
}

/// Defaults for training runs started without explicit hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub iterations: u32,
    pub learning_rate: f64,
    pub batch_size: u32,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            iterations: 600,
            learning_rate: 1e-5,
            batch_size: 4,
        }
    }
}

/// Top-level settings file (mirrors `config.yaml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub server: ServerSettings,
    pub scan: ScanSettings,
    pub bootstrap: BootstrapSettings,
    pub training: TrainingSettings,
}

// ─── Loading ─────────────────────────────────────────────────────────────────

impl RuntimeSettings {
    /// Load from the layout's config file, or return defaults.
    pub fn load_or_default(layout: &RuntimeLayout) -> Self {
        let path = layout.config_file();
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(cfg) => {
                tracing::info!(path = %path.display(), "loaded runtime settings");
                cfg
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "bad runtime settings, using defaults");
                Self::default()
            }
        }
    }

    /// Parse a settings file, interpolating `${VAR}` / `${VAR:-default}`.
    /// A `~` at the start of a fallback becomes the home directory.
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        let interpolated = interpolate_env_vars(&raw);
        serde_yaml::from_str(&interpolated).map_err(|e| format!("failed to parse config: {e}"))
    }

    /// Save to the layout's config file (atomic write).
    pub fn save(&self, layout: &RuntimeLayout) -> Result<(), String> {
        let path = layout.config_file();
        let content =
            serde_yaml::to_string(self).map_err(|e| format!("failed to serialize settings: {e}"))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
        }
        let tmp_path = path.with_extension("yaml.tmp");
        std::fs::write(&tmp_path, content)
            .map_err(|e| format!("failed to write {}: {e}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .map_err(|e| format!("failed to rename settings file: {e}"))?;
        tracing::debug!(path = %path.display(), "saved runtime settings");
        Ok(())
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
