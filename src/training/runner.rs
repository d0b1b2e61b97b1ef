//! Training job runner: single-flight `mlx_lm.lora` subprocesses.
//!
//! ```text
//! Idle ──run──▶ Running ──cancel──▶ Cancelling
//!   ▲              │                    │
//!   └──── process exit (any code) ◀─────┘
//! ```
//!
//! A second `run` while not Idle fails with `AlreadyRunning`; nothing is
//! queued. Artifact metadata is written before the trainer starts, so a
//! crashed run still leaves an attributable directory behind.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};

use chrono::{Local, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::oneshot;

use super::dataset::create_dataset_scaffold;
use super::errors::TrainingError;
use super::types::{
    ArtifactMetadata, DatasetFormat, TrainingOutcome, TrainingPhase, TrainingRequest, METADATA_FILE,
};
use crate::process::{isolate_process_group, request_terminate};
use crate::runtime::resolver::is_executable;
use crate::runtime::RuntimeLayout;

/// Trainer entry point inside the private prefix.
pub const TRAINER_EXECUTABLE: &str = "mlx_lm.lora";

enum JobState {
    Idle,
    Running {
        pid: Option<u32>,
        cancel: Option<oneshot::Sender<()>>,
    },
    Cancelling {
        pid: Option<u32>,
    },
}

/// Resets the job slot to Idle however `run` exits.
struct JobSlot<'a> {
    state: &'a Mutex<JobState>,
}

impl Drop for JobSlot<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = JobState::Idle;
    }
}

/// Exclusive owner of the training subprocess.
pub struct TrainingJobRunner {
    layout: RuntimeLayout,
    state: Mutex<JobState>,
}

impl TrainingJobRunner {
    pub fn new(layout: RuntimeLayout) -> Self {
        Self {
            layout,
            state: Mutex::new(JobState::Idle),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> TrainingPhase {
        match &*self.lock_state() {
            JobState::Idle => TrainingPhase::Idle,
            JobState::Running { .. } => TrainingPhase::Running,
            JobState::Cancelling { .. } => TrainingPhase::Cancelling,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase() != TrainingPhase::Idle
    }

    /// Pid of the live trainer, once it has been spawned.
    pub fn active_pid(&self) -> Option<u32> {
        match &*self.lock_state() {
            JobState::Idle => None,
            JobState::Running { pid, .. } | JobState::Cancelling { pid } => *pid,
        }
    }

    /// Create (or refresh) a dataset scaffold under the runtime's dataset root.
    pub fn create_dataset_scaffold(&self, name: &str, format: DatasetFormat) -> Result<PathBuf, TrainingError> {
        create_dataset_scaffold(&self.layout.datasets_dir(), name, format)
    }

    /// Ask the live trainer to stop. Returns immediately; the in-flight
    /// `run` reports the resulting non-zero exit.
    ///
    /// Returns `false` when nothing was running.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock_state();
        let JobState::Running { pid, cancel } = &mut *state else {
            return false;
        };
        let pid = *pid;
        if let Some(tx) = cancel.take() {
            let _ = tx.send(());
        }
        tracing::info!(pid = ?pid, "training job cancellation requested");
        *state = JobState::Cancelling { pid };
        true
    }

    /// Run a training job to completion and return its exit code and log.
    pub async fn run(&self, request: &TrainingRequest) -> Result<TrainingOutcome, TrainingError> {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        {
            let mut state = self.lock_state();
            if !matches!(*state, JobState::Idle) {
                return Err(TrainingError::AlreadyRunning);
            }
            *state = JobState::Running {
                pid: None,
                cancel: Some(cancel_tx),
            };
        }
        let _slot = JobSlot { state: &self.state };

        let executable = self.layout.venv_executable(TRAINER_EXECUTABLE);
        if !is_executable(&executable) {
            return Err(TrainingError::MissingExecutable {
                name: TRAINER_EXECUTABLE.to_string(),
                path: executable,
            });
        }

        self.layout.ensure()?;
        let artifact_dir = create_artifact_dir(&self.layout.adapters_dir())?;
        write_metadata(&artifact_dir, &request.model_id)?;

        let iterations = request.iterations.max(1);
        let batch_size = request.batch_size.max(1);

        let mut cmd = Command::new(&executable);
        cmd.arg("--model")
            .arg(&request.model_path)
            .arg("--train")
            .arg("--data")
            .arg(&request.dataset_path)
            .args(["--iters", &iterations.to_string()])
            .args(["--batch-size", &batch_size.to_string()])
            .args(["--learning-rate", &request.learning_rate.to_string()])
            .arg("--adapter-path")
            .arg(&artifact_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        isolate_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| TrainingError::SpawnFailed {
            reason: format!("{}: {e}", executable.display()),
        })?;
        let pid = child.id();
        if let JobState::Running { pid: slot_pid, .. } | JobState::Cancelling { pid: slot_pid } =
            &mut *self.lock_state()
        {
            *slot_pid = pid;
        }

        tracing::info!(
            pid = ?pid,
            model_id = %request.model_id,
            dataset = %request.dataset_path.display(),
            iterations,
            batch_size,
            learning_rate = request.learning_rate,
            artifact_dir = %artifact_dir.display(),
            "training job started"
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let wait = async {
            tokio::select! {
                status = child.wait() => status,
                Ok(()) = cancel_rx => {
                    if let Err(e) = request_terminate(&mut child) {
                        tracing::warn!(pid = ?pid, error = %e, "failed to signal trainer");
                    }
                    child.wait().await
                }
            }
        };

        let (status, out, err) = tokio::join!(wait, read_all(stdout), read_all(stderr));
        let status = status.map_err(TrainingError::io("failed to wait for trainer"))?;

        let mut log = String::from_utf8_lossy(&out).into_owned();
        log.push_str(&String::from_utf8_lossy(&err));
        let exit_code = status.code().unwrap_or(-1);

        tracing::info!(pid = ?pid, exit_code, log_bytes = log.len(), "training job finished");

        Ok(TrainingOutcome {
            exit_code,
            log,
            artifact_dir,
        })
    }
}

/// Drain a child stream fully; a missing or broken stream yields what was read.
async fn read_all<R: AsyncRead + Unpin>(stream: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        if let Err(e) = stream.read_to_end(&mut buf).await {
            tracing::warn!(error = %e, "trainer output stream error");
        }
    }
    buf
}

/// Claim a fresh timestamp-named directory under `root`.
fn create_artifact_dir(root: &Path) -> Result<PathBuf, TrainingError> {
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    for attempt in 1u32.. {
        let name = if attempt == 1 {
            stamp.clone()
        } else {
            format!("{stamp}-{attempt}")
        };
        let dir = root.join(name);
        match std::fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(TrainingError::io(format!("failed to create {}", dir.display()))(e)),
        }
    }
    unreachable!("unbounded attempt counter")
}

fn write_metadata(dir: &Path, model_id: &str) -> Result<(), TrainingError> {
    let meta = ArtifactMetadata {
        model_id: model_id.to_string(),
        created_at: Utc::now(),
    };
    let path = dir.join(METADATA_FILE);
    let content = serde_json::to_string_pretty(&meta).map_err(|e| TrainingError::Io {
        context: "failed to serialize artifact metadata".into(),
        source: std::io::Error::other(e),
    })?;
    std::fs::write(&path, content).map_err(TrainingError::io(format!("failed to write {}", path.display())))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::write_script;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fixture(trainer_body: &str) -> (TempDir, RuntimeLayout) {
        let tmp = TempDir::new().unwrap();
        let layout = RuntimeLayout::at(tmp.path().join("root"));
        write_script(&layout.venv_executable(TRAINER_EXECUTABLE), trainer_body);
        (tmp, layout)
    }

    fn request(iterations: u32, batch_size: u32) -> TrainingRequest {
        TrainingRequest {
            model_id: "mlx-community/tiny".into(),
            model_path: PathBuf::from("/models/tiny"),
            dataset_path: PathBuf::from("/data/set"),
            iterations,
            learning_rate: 0.0001,
            batch_size,
        }
    }

    fn artifact_count(layout: &RuntimeLayout) -> usize {
        std::fs::read_dir(layout.adapters_dir())
            .map(|d| d.flatten().count())
            .unwrap_or(0)
    }

    async fn wait_for_pid(runner: &TrainingJobRunner) {
        for _ in 0..200 {
            if runner.active_pid().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("trainer never started");
    }

    #[tokio::test]
    async fn test_run_captures_output_and_metadata() {
        let (_tmp, layout) = fixture("echo \"args: $*\"\necho 'warn: slow' >&2\nexit 0");
        let runner = TrainingJobRunner::new(layout.clone());

        let outcome = runner.run(&request(0, 0)).await.unwrap();

        assert!(outcome.succeeded());
        assert!(outcome.artifact_dir.starts_with(layout.adapters_dir()));
        let stdout_at = outcome.log.find("args:").unwrap();
        let stderr_at = outcome.log.find("warn: slow").unwrap();
        assert!(stdout_at < stderr_at, "stdout must precede stderr");
        assert!(outcome.log.contains("--iters 1"));
        assert!(outcome.log.contains("--batch-size 1"));
        assert!(outcome.log.contains(&format!("--adapter-path {}", outcome.artifact_dir.display())));

        let meta: ArtifactMetadata =
            serde_json::from_str(&std::fs::read_to_string(outcome.artifact_dir.join(METADATA_FILE)).unwrap())
                .unwrap();
        assert_eq!(meta.model_id, "mlx-community/tiny");
        assert_eq!(runner.phase(), TrainingPhase::Idle);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported_not_raised() {
        let (_tmp, layout) = fixture("echo 'boom' >&2\nexit 3");
        let runner = TrainingJobRunner::new(layout);
        let outcome = runner.run(&request(10, 2)).await.unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.log.trim(), "boom");
        assert!(outcome.artifact_dir.join(METADATA_FILE).exists());
    }

    #[tokio::test]
    async fn test_second_run_fails_fast_and_cancel_ends_first() {
        let (_tmp, layout) = fixture("echo started\nexec sleep 30");
        let runner = Arc::new(TrainingJobRunner::new(layout.clone()));

        let first = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(&request(100, 4)).await })
        };
        wait_for_pid(&runner).await;

        let err = runner.run(&request(100, 4)).await.unwrap_err();
        assert!(matches!(err, TrainingError::AlreadyRunning));
        assert_eq!(artifact_count(&layout), 1);

        assert!(runner.cancel());
        assert_eq!(runner.phase(), TrainingPhase::Cancelling);

        let outcome = tokio::time::timeout(Duration::from_secs(10), first)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_ne!(outcome.exit_code, 0);
        assert!(outcome.log.contains("started"));
        assert_eq!(runner.phase(), TrainingPhase::Idle);
        assert!(!runner.cancel());
    }

    #[tokio::test]
    async fn test_cancel_completes_when_trainer_forks_helpers() {
        // No `exec`: the sleep is a grandchild sharing the output pipes.
        let (_tmp, layout) = fixture("echo started\nsleep 30\necho unreachable");
        let runner = Arc::new(TrainingJobRunner::new(layout));

        let job = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(&request(5, 1)).await })
        };
        wait_for_pid(&runner).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(runner.cancel());

        let outcome = tokio::time::timeout(Duration::from_secs(5), job)
            .await
            .expect("run must finish soon after cancel")
            .unwrap()
            .unwrap();
        assert_ne!(outcome.exit_code, 0);
        assert!(outcome.log.contains("started"));
        assert!(!outcome.log.contains("unreachable"));
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_missing_trainer_creates_nothing() {
        let tmp = TempDir::new().unwrap();
        let layout = RuntimeLayout::at(tmp.path().join("root"));
        let runner = TrainingJobRunner::new(layout.clone());
        let err = runner.run(&request(1, 1)).await.unwrap_err();
        assert!(matches!(err, TrainingError::MissingExecutable { .. }));
        assert_eq!(artifact_count(&layout), 0);
        assert!(!runner.is_running());
    }

    #[test]
    fn test_artifact_dir_collision_gets_suffix() {
        let tmp = TempDir::new().unwrap();
        let a = create_artifact_dir(tmp.path()).unwrap();
        let b = create_artifact_dir(tmp.path()).unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
    }
}
