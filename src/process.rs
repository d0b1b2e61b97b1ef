//! Child-process termination shared by the server supervisor and the
//! training runner.
//!
//! Supervised children lead their own process group, so a signal reaches any
//! helpers they fork (shell wrappers, worker processes) along with them.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};

/// Put the child in a new process group led by itself (Unix only).
pub fn isolate_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(not(unix))]
    let _ = cmd;
}

/// Send `signal` to the group led by `pid`, falling back to `pid` alone when
/// it does not lead a group.
#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let pid = pid as libc::pid_t;
    // SAFETY: signal delivery to a pid we spawned and have not yet reaped,
    // or to the group it leads.
    if unsafe { libc::kill(-pid, signal) } == 0 {
        return Ok(());
    }
    if unsafe { libc::kill(pid, signal) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Ask a child to exit (SIGTERM to its group on Unix, hard kill elsewhere).
/// Does not wait.
///
/// A child that has already been reaped is left alone.
pub fn request_terminate(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };

    #[cfg(unix)]
    {
        signal_group(pid, libc::SIGTERM)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        child.start_kill()
    }
}

/// Terminate a child gracefully, force-killing it after `grace`.
pub async fn terminate_and_wait(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    let pid = child.id();
    if let Err(e) = request_terminate(child) {
        tracing::warn!(pid = ?pid, error = %e, "terminate signal failed");
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(pid = ?pid, grace_ms = grace.as_millis() as u64, "process ignored terminate, killing");
            #[cfg(unix)]
            if let Some(pid) = pid {
                let _ = signal_group(pid, libc::SIGKILL);
            }
            child.kill().await?;
            child.wait().await
        }
    }
}

/// True if a pid still names a live process (Unix only; used by tests).
#[cfg(all(test, unix))]
pub fn pid_alive(pid: u32) -> bool {
    // SAFETY: signal 0 performs only the existence/permission check.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_terminate_and_wait_stops_sleeper() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id().unwrap();
        let status = terminate_and_wait(&mut child, Duration::from_secs(5)).await.unwrap();
        assert!(!status.success());
        assert!(!pid_alive(pid));
    }

    #[tokio::test]
    async fn test_force_kill_after_grace() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .unwrap();
        // Give the shell a moment to install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = terminate_and_wait(&mut child, Duration::from_millis(300)).await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_terminate_reaches_forked_helpers() {
        // The backgrounded sleep holds the stdout pipe; it only closes once
        // the whole group is gone.
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30 & wait"]).stdout(Stdio::piped());
        isolate_process_group(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let mut stdout = child.stdout.take().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        terminate_and_wait(&mut child, Duration::from_secs(5)).await.unwrap();

        let mut buf = Vec::new();
        let drained = tokio::time::timeout(Duration::from_secs(5), stdout.read_to_end(&mut buf)).await;
        assert!(drained.is_ok(), "pipe held open by a surviving helper");
    }

    #[tokio::test]
    async fn test_exited_child_is_left_alone() {
        let mut child = Command::new("true").spawn().unwrap();
        child.wait().await.unwrap();
        assert!(request_terminate(&mut child).is_ok());
        let status = terminate_and_wait(&mut child, Duration::from_millis(100)).await.unwrap();
        assert!(status.success());
    }
}
