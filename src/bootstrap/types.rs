//! Bootstrap report and persisted marker types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single bootstrap step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Already present; nothing was done.
    Ok,
    /// Installed or created during this run.
    Installed,
    Failed,
    Skipped,
}

/// Result of one bootstrap step. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapStepResult {
    pub name: String,
    pub state: StepState,
    pub detail: String,
}

impl BootstrapStepResult {
    fn new(name: &str, state: StepState, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            state,
            detail: detail.into(),
        }
    }

    pub fn ok(name: &str, detail: impl Into<String>) -> Self {
        Self::new(name, StepState::Ok, detail)
    }

    pub fn installed(name: &str, detail: impl Into<String>) -> Self {
        Self::new(name, StepState::Installed, detail)
    }

    pub fn failed(name: &str, detail: impl Into<String>) -> Self {
        Self::new(name, StepState::Failed, detail)
    }

    pub fn skipped(name: &str, detail: impl Into<String>) -> Self {
        Self::new(name, StepState::Skipped, detail)
    }

    pub fn is_failed(&self) -> bool {
        self.state == StepState::Failed
    }
}

/// Immutable snapshot of one bootstrap pass, steps in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<BootstrapStepResult>,
}

impl BootstrapReport {
    /// True when no step failed.
    pub fn succeeded(&self) -> bool {
        !self.steps.iter().any(BootstrapStepResult::is_failed)
    }

    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&BootstrapStepResult> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// On-disk marker written after a fully successful bootstrap pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMarker {
    pub schema_version: u32,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_succeeded_ignores_skipped() {
        let now = Utc::now();
        let report = BootstrapReport {
            started_at: now,
            finished_at: now,
            steps: vec![
                BootstrapStepResult::skipped("speech-cli", "n/a"),
                BootstrapStepResult::installed("venv", "created"),
            ],
        };
        assert!(report.succeeded());
        assert_eq!(report.step("venv").unwrap().state, StepState::Installed);
    }

    #[test]
    fn test_marker_wire_format() {
        let json = r#"{"schemaVersion":2,"updatedAt":"2026-01-02T03:04:05Z"}"#;
        let marker: StateMarker = serde_json::from_str(json).unwrap();
        assert_eq!(marker.schema_version, 2);
        let state = serde_json::to_string(&StepState::Installed).unwrap();
        assert_eq!(state, "\"installed\"");
    }
}
