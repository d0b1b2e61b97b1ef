//! Readiness polling for a freshly launched server.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::Instant;

/// Upper bound for a single readiness request.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP client for loopback traffic; proxies are bypassed.
pub fn local_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().no_proxy().build()
}

/// Base URL for a bound host/port. Wildcard binds are probed on loopback.
pub fn base_url(host: &str, port: u16) -> String {
    let probe_host = match host {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" => "::1",
        other => other,
    };
    if probe_host.contains(':') {
        format!("http://[{probe_host}]:{port}")
    } else {
        format!("http://{probe_host}:{port}")
    }
}

/// How a readiness wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// The launched process exited before the health path answered.
    Exited(ExitStatus),
    TimedOut,
}

/// Poll `url` every `interval` until it answers 2xx, `child` exits, or
/// `timeout` elapses.
///
/// Connection errors and non-2xx answers are both "not ready yet". A 2xx only
/// counts while `child` is still alive, so another listener on the same port
/// cannot stand in for a crashed launch. The first request waits one interval.
pub async fn wait_until_ready(
    client: &reqwest::Client,
    url: &str,
    child: &mut Child,
    timeout: Duration,
    interval: Duration,
) -> Readiness {
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::debug!(url, attempts, "readiness deadline reached");
            return Readiness::TimedOut;
        }
        tokio::time::sleep(interval.min(remaining)).await;

        if let Some(status) = exited(child) {
            tracing::debug!(url, attempts, status = %status, "process exited before readiness");
            return Readiness::Exited(status);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            continue;
        }
        attempts += 1;
        if let Ok(resp) = client.get(url).timeout(remaining.min(PROBE_TIMEOUT)).send().await {
            if resp.status().is_success() {
                if let Some(status) = exited(child) {
                    return Readiness::Exited(status);
                }
                tracing::debug!(url, attempts, "server ready");
                return Readiness::Ready;
            }
        }
    }
}

/// Exit status if the child is gone. A poll error leaves the deadline in charge.
fn exited(child: &mut Child) -> Option<ExitStatus> {
    match child.try_wait() {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!(error = %e, "cannot poll launched process");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_forms() {
        assert_eq!(base_url("127.0.0.1", 8080), "http://127.0.0.1:8080");
        assert_eq!(base_url("0.0.0.0", 9000), "http://127.0.0.1:9000");
        assert_eq!(base_url("::1", 7), "http://[::1]:7");
    }
}
