//! Persisted bootstrap state marker.

use std::path::Path;

use chrono::Utc;

use super::types::StateMarker;

/// Bump whenever the required environment changes shape; older markers
/// then force a full re-check.
pub const MARKER_SCHEMA_VERSION: u32 = 2;

/// Read the marker. Missing, unreadable, or stale markers are `None`.
pub fn read_marker(path: &Path) -> Option<StateMarker> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<StateMarker>(&content) {
        Ok(marker) if marker.schema_version == MARKER_SCHEMA_VERSION => Some(marker),
        Ok(marker) => {
            tracing::info!(
                found = marker.schema_version,
                expected = MARKER_SCHEMA_VERSION,
                "bootstrap marker version mismatch"
            );
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable bootstrap marker");
            None
        }
    }
}

/// Write a fresh marker with the current schema version (atomic write).
pub fn write_marker(path: &Path) -> Result<StateMarker, String> {
    let marker = StateMarker {
        schema_version: MARKER_SCHEMA_VERSION,
        updated_at: Utc::now(),
    };
    let content = serde_json::to_string_pretty(&marker)
        .map_err(|e| format!("failed to serialize bootstrap marker: {e}"))?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content)
        .map_err(|e| format!("failed to write {}: {e}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("failed to persist bootstrap marker: {e}"))?;
    Ok(marker)
}
