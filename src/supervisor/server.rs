//! Inference-server process supervisor.
//!
//! Owns at most one `mlx_lm.server` process. State transitions:
//!
//! ```text
//! Idle ──start──▶ Starting ──ready──▶ Ready ──stop/restart──▶ Stopping ──▶ Idle
//!                    │
//!                    └──timeout / spawn error (process torn down)──▶ Idle
//! ```
//!
//! `start` and `stop` are serialised by an async operation lock, so two
//! callers can never race two launches. The state itself sits behind a
//! short-lived sync lock so `is_running` never waits on a launch.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::process::{Child, Command};

use super::errors::SupervisorError;
use super::readiness::{base_url, local_http_client, wait_until_ready, Readiness};
use crate::process::{isolate_process_group, terminate_and_wait};
use crate::runtime::config::ServerSettings;
use crate::runtime::resolver::is_executable;
use crate::runtime::RuntimeLayout;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Server entry point inside the private prefix.
pub const SERVER_EXECUTABLE: &str = "mlx_lm.server";

/// Grace period between SIGTERM and a hard kill.
const STOP_GRACE: Duration = Duration::from_secs(5);

// ─── Types ───────────────────────────────────────────────────────────────────

/// Readiness and shutdown timing.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub health_path: String,
    pub readiness_timeout: Duration,
    pub poll_interval: Duration,
    pub stop_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for SupervisorConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            health_path: settings.health_path.clone(),
            readiness_timeout: settings.readiness_timeout(),
            poll_interval: settings.poll_interval(),
            stop_grace: STOP_GRACE,
        }
    }
}

/// Externally visible lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerPhase {
    Idle,
    Starting,
    Ready,
    Stopping,
}

/// Snapshot of the live server, handed to chat clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub pid: u32,
    pub model_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub adapter_path: Option<PathBuf>,
    pub base_url: String,
}

/// The single live server process.
struct ServerHandle {
    child: Child,
    info: ServerInfo,
}

impl ServerHandle {
    fn matches(&self, model_path: &Path, host: &str, port: u16) -> bool {
        self.info.model_path == model_path && self.info.host == host && self.info.port == port
    }
}

enum ServerState {
    Idle,
    Starting,
    Ready(ServerHandle),
    Stopping,
}

/// Drops an abandoned Starting/Stopping transition back to Idle, including
/// when the owning future is cancelled mid-await.
struct TransitionGuard<'a> {
    state: &'a Mutex<ServerState>,
    armed: bool,
}

impl<'a> TransitionGuard<'a> {
    fn new(state: &'a Mutex<ServerState>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*state, ServerState::Starting | ServerState::Stopping) {
            *state = ServerState::Idle;
        }
    }
}

// ─── ProcessSupervisor ───────────────────────────────────────────────────────

/// Exclusive owner of the inference-server process.
pub struct ProcessSupervisor {
    layout: RuntimeLayout,
    config: SupervisorConfig,
    client: reqwest::Client,
    ops: tokio::sync::Mutex<()>,
    state: Mutex<ServerState>,
}

impl ProcessSupervisor {
    pub fn new(layout: RuntimeLayout, config: SupervisorConfig) -> Result<Self, SupervisorError> {
        let client = local_http_client().map_err(|e| SupervisorError::HttpClient {
            reason: e.to_string(),
        })?;
        Ok(Self {
            layout,
            config,
            client,
            ops: tokio::sync::Mutex::new(()),
            state: Mutex::new(ServerState::Idle),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        // A poisoned lock still holds a consistent enum; keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ServerPhase {
        match &*self.lock_state() {
            ServerState::Idle => ServerPhase::Idle,
            ServerState::Starting => ServerPhase::Starting,
            ServerState::Ready(_) => ServerPhase::Ready,
            ServerState::Stopping => ServerPhase::Stopping,
        }
    }

    /// True while a ready server process is alive.
    ///
    /// A server that exited on its own is reaped here and the state drops to Idle.
    pub fn is_running(&self) -> bool {
        let mut state = self.lock_state();
        let ServerState::Ready(handle) = &mut *state else {
            return false;
        };
        match handle.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::warn!(pid = handle.info.pid, status = %status, "inference server exited on its own");
                *state = ServerState::Idle;
                false
            }
            Err(e) => {
                tracing::warn!(pid = handle.info.pid, error = %e, "cannot poll inference server, treating as dead");
                *state = ServerState::Idle;
                false
            }
        }
    }

    /// Info for the live server, if any.
    pub fn info(&self) -> Option<ServerInfo> {
        if !self.is_running() {
            return None;
        }
        match &*self.lock_state() {
            ServerState::Ready(handle) => Some(handle.info.clone()),
            _ => None,
        }
    }

    /// Start the server, or return the live one if it already serves the
    /// same `(model_path, host, port)`.
    ///
    /// A live server with a different triple is stopped first. On readiness
    /// timeout the new process is torn down and no handle remains.
    pub async fn start(
        &self,
        model_path: &Path,
        host: &str,
        port: u16,
        adapter_path: Option<&Path>,
    ) -> Result<ServerInfo, SupervisorError> {
        let _op = self.ops.lock().await;

        if self.is_running() {
            if let ServerState::Ready(handle) = &*self.lock_state() {
                if handle.matches(model_path, host, port) {
                    tracing::debug!(pid = handle.info.pid, "inference server already running with same model");
                    return Ok(handle.info.clone());
                }
            }
        }

        self.stop_locked().await?;

        let executable = self.layout.venv_executable(SERVER_EXECUTABLE);
        if !is_executable(&executable) {
            return Err(SupervisorError::MissingExecutable {
                name: SERVER_EXECUTABLE.to_string(),
                path: executable,
            });
        }
        self.layout.ensure()?;

        *self.lock_state() = ServerState::Starting;
        let transition = TransitionGuard::new(&self.state);
        let handle = self.launch(&executable, model_path, host, port, adapter_path).await?;
        let info = handle.info.clone();
        *self.lock_state() = ServerState::Ready(handle);
        transition.disarm();
        Ok(info)
    }

    async fn launch(
        &self,
        executable: &Path,
        model_path: &Path,
        host: &str,
        port: u16,
        adapter_path: Option<&Path>,
    ) -> Result<ServerHandle, SupervisorError> {
        let log_path = self.layout.logs_dir().join("server.log");
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|source| SupervisorError::Io {
                context: format!("failed to open {}", log_path.display()),
                source,
            })?;
        let stderr_file = log_file.try_clone().map_err(|source| SupervisorError::Io {
            context: "failed to duplicate server log handle".into(),
            source,
        })?;

        let mut cmd = Command::new(executable);
        cmd.arg("--model")
            .arg(model_path)
            .args(["--host", host])
            .args(["--port", &port.to_string()]);
        if let Some(adapter) = adapter_path {
            cmd.arg("--adapter-path").arg(adapter);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(true);
        isolate_process_group(&mut cmd);

        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|e| SupervisorError::SpawnFailed {
            reason: format!("{}: {e}", executable.display()),
        })?;
        let pid = child.id().unwrap_or_default();

        let base = base_url(host, port);
        let health_url = format!("{base}{}", self.config.health_path);
        tracing::info!(
            pid,
            model = %model_path.display(),
            host,
            port,
            adapter = ?adapter_path,
            "inference server launched, waiting for readiness"
        );

        let readiness = wait_until_ready(
            &self.client,
            &health_url,
            &mut child,
            self.config.readiness_timeout,
            self.config.poll_interval,
        )
        .await;

        if readiness != Readiness::Ready {
            match readiness {
                Readiness::Exited(status) => {
                    tracing::warn!(pid, status = %status, url = %health_url, "inference server exited before becoming ready")
                }
                _ => tracing::warn!(pid, url = %health_url, "inference server never became ready, tearing down"),
            }
            if let Err(e) = terminate_and_wait(&mut child, self.config.stop_grace).await {
                tracing::warn!(pid, error = %e, "failed to reap unready server");
            }
            return Err(SupervisorError::ReadinessTimeout {
                url: health_url,
                timeout_ms: self.config.readiness_timeout.as_millis() as u64,
            });
        }

        tracing::info!(pid, url = %base, "inference server ready");
        Ok(ServerHandle {
            child,
            info: ServerInfo {
                pid,
                model_path: model_path.to_path_buf(),
                host: host.to_string(),
                port,
                adapter_path: adapter_path.map(Path::to_path_buf),
                base_url: base,
            },
        })
    }

    /// Stop the live server and wait for it to exit. No-op when idle.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let _op = self.ops.lock().await;
        self.stop_locked().await
    }

    /// Stop while the operation lock is held.
    async fn stop_locked(&self) -> Result<(), SupervisorError> {
        let handle = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, ServerState::Stopping) {
                ServerState::Ready(handle) => Some(handle),
                other => {
                    *state = other;
                    None
                }
            }
        };
        let Some(mut handle) = handle else {
            return Ok(());
        };
        let _transition = TransitionGuard::new(&self.state);

        let pid = handle.info.pid;
        tracing::info!(pid, "stopping inference server");
        let result = terminate_and_wait(&mut handle.child, self.config.stop_grace).await;
        *self.lock_state() = ServerState::Idle;

        match result {
            Ok(status) => {
                tracing::info!(pid, status = %status, "inference server stopped");
                Ok(())
            }
            Err(source) => Err(SupervisorError::Io {
                context: format!("failed to stop inference server (pid {pid})"),
                source,
            }),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
