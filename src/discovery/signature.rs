//! Server fingerprinting and model-hint extraction from probe bodies.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;

/// What a probed endpoint appears to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerSignature {
    Ollama,
    LmStudio,
    LlamaCpp,
    Mlx,
    Vllm,
    OpenAiCompatible,
    /// Answered with an empty body.
    Reachable,
    /// Answered with something unrecognised.
    CustomLocalService,
}

/// Checked in order, first match wins. Needles are matched against the
/// lowercased body with whitespace removed.
const FINGERPRINTS: &[(ServerSignature, &[&str])] = &[
    (ServerSignature::Ollama, &["ollama", "\"modified_at\":"]),
    (ServerSignature::LmStudio, &["lmstudio", "lm-studio"]),
    (ServerSignature::LlamaCpp, &["llama.cpp", "llamacpp", "llama-cpp"]),
    (ServerSignature::Mlx, &["mlx"]),
    (ServerSignature::Vllm, &["vllm"]),
    (ServerSignature::OpenAiCompatible, &["\"object\":\"list\"", "\"data\":["]),
];

impl ServerSignature {
    pub fn label(self) -> &'static str {
        match self {
            ServerSignature::Ollama => "Ollama",
            ServerSignature::LmStudio => "LM Studio",
            ServerSignature::LlamaCpp => "llama.cpp",
            ServerSignature::Mlx => "MLX",
            ServerSignature::Vllm => "vLLM",
            ServerSignature::OpenAiCompatible => "OpenAI-compatible",
            ServerSignature::Reachable => "reachable",
            ServerSignature::CustomLocalService => "custom local service",
        }
    }

    /// Classify a response body.
    pub fn classify(body: &str) -> Self {
        let normalized: String = body
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();

        if normalized.is_empty() {
            return ServerSignature::Reachable;
        }

        FINGERPRINTS
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| normalized.contains(n)))
            .map(|(sig, _)| *sig)
            .unwrap_or(ServerSignature::CustomLocalService)
    }
}

impl fmt::Display for ServerSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for ServerSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Best-effort default model identifier from a probe body.
///
/// OpenAI-style `data[0].id` first, then Ollama-style `models[0].name` or
/// `models[0].model`, then the first `"id": "..."` pair anywhere in the text.
pub fn extract_model_hint(body: &str) -> Option<String> {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let from_json = json
            .pointer("/data/0/id")
            .or_else(|| json.pointer("/models/0/name"))
            .or_else(|| json.pointer("/models/0/model"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        if let Some(hint) = from_json {
            return Some(hint.to_string());
        }
    }
    scan_id_field(body)
}

/// Find the first `"id"` key followed by a string value in raw text.
fn scan_id_field(body: &str) -> Option<String> {
    let mut rest = body;
    while let Some(at) = rest.find("\"id\"") {
        let after = rest[at + 4..].trim_start();
        if let Some(value) = after.strip_prefix(':').map(str::trim_start) {
            if let Some(value) = value.strip_prefix('"') {
                if let Some(end) = value.find('"') {
                    let id = &value[..end];
                    if !id.is_empty() {
                        return Some(id.to_string());
                    }
                }
            }
        }
        rest = &rest[at + 4..];
    }
    None
}
