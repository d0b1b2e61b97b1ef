//! Concurrent probing of well-known local model-server ports.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;

use super::signature::{extract_model_hint, ServerSignature};
use crate::runtime::config::ScanSettings;
use crate::supervisor::readiness::{base_url, local_http_client};

/// A local endpoint that answered a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointCandidate {
    pub base_url: String,
    pub probe_path: String,
    pub status_code: u16,
    pub signature: ServerSignature,
    pub model_hint: Option<String>,
}

/// Ports, paths and timeout for one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub host: String,
    pub ports: Vec<u16>,
    pub paths: Vec<String>,
    pub probe_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::from(&ScanSettings::default())
    }
}

impl From<&ScanSettings> for ScanConfig {
    fn from(settings: &ScanSettings) -> Self {
        Self {
            host: settings.host.clone(),
            ports: settings.ports.clone(),
            paths: settings.paths.clone(),
            probe_timeout: Duration::from_millis(settings.probe_timeout_ms),
        }
    }
}

pub struct EndpointScanner {
    config: ScanConfig,
    client: reqwest::Client,
}

impl EndpointScanner {
    pub fn new(config: ScanConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            config,
            client: local_http_client()?,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Probe every port × path pair concurrently.
    ///
    /// Candidates are unique per (base URL, probe path) and sorted by base URL
    /// then path. Connection failures, timeouts and 5xx answers are dropped.
    pub async fn scan(&self) -> Vec<EndpointCandidate> {
        let probes = self.config.ports.iter().flat_map(|&port| {
            let base = base_url(&self.config.host, port);
            self.config
                .paths
                .iter()
                .map(move |path| self.probe(base.clone(), path.clone()))
        });

        let results = join_all(probes).await;
        let attempted = results.len();

        let mut unique: BTreeMap<(String, String), EndpointCandidate> = BTreeMap::new();
        for candidate in results.into_iter().flatten() {
            unique
                .entry((candidate.base_url.clone(), candidate.probe_path.clone()))
                .or_insert(candidate);
        }

        let candidates: Vec<EndpointCandidate> = unique.into_values().collect();
        tracing::info!(probes = attempted, found = candidates.len(), "endpoint scan complete");
        candidates
    }

    async fn probe(&self, base: String, path: String) -> Option<EndpointCandidate> {
        let url = format!("{base}{path}");
        let resp = match self.client.get(&url).timeout(self.config.probe_timeout).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::trace!(url = %url, error = %e, "probe failed");
                return None;
            }
        };

        let status = resp.status().as_u16();
        if !(200..=499).contains(&status) {
            tracing::debug!(url = %url, status, "probe answered with server error");
            return None;
        }

        // A body that stalls past the deadline still counts as a listener.
        let body = tokio::time::timeout(self.config.probe_timeout, resp.text())
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();

        let signature = ServerSignature::classify(&body);
        let model_hint = extract_model_hint(&body);
        tracing::debug!(url = %url, status, signature = %signature, model_hint = ?model_hint, "endpoint found");

        Some(EndpointCandidate {
            base_url: base,
            probe_path: path,
            status_code: status,
            signature,
            model_hint,
        })
    }
}
