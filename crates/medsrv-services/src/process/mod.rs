//! Child process plumbing shared by the service managers.
//!
//! - [`ServiceProcessHandle`]: an owned, spawned child with output capture
//! - [`ProbeRunner`]: seam for short-lived external commands
//! - [`ProcessUtils`]: pid-level liveness checks and termination

mod handle;
mod probe;

pub use handle::{OutputLine, OutputStream, OutputTail, ProcessSpec, ServiceProcessHandle};
pub use probe::{ProbeCommand, ProbeOutput, ProbeRunner, SystemProbeRunner};

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::ServiceError;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Utility functions for pid-level process management
pub struct ProcessUtils;

impl ProcessUtils {
    /// Check if a process with given PID is alive
    pub fn is_process_running(pid: u32) -> bool {
        #[cfg(unix)]
        {
            let Ok(pid) = libc::pid_t::try_from(pid) else {
                return false;
            };
            // Signal 0 performs the permission and existence checks only
            let rc = unsafe { libc::kill(pid, 0) };
            rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
        }

        #[cfg(windows)]
        {
            let output = std::process::Command::new("tasklist")
                .args(["/FI", &format!("PID eq {pid}"), "/NH"])
                .output();
            match output {
                Ok(result) => String::from_utf8_lossy(&result.stdout)
                    .split_whitespace()
                    .any(|token| token == pid.to_string()),
                Err(_) => false,
            }
        }
    }

    /// Send a signal to a process
    #[cfg(unix)]
    pub fn send_signal(pid: u32, signal: libc::c_int) -> Result<(), ServiceError> {
        let target = libc::pid_t::try_from(pid).map_err(|_| ServiceError::ProcessKillFailed {
            service: format!("pid {pid}"),
            reason: "pid out of range".to_string(),
        })?;

        if unsafe { libc::kill(target, signal) } == 0 {
            Ok(())
        } else {
            Err(ServiceError::ProcessKillFailed {
                service: format!("pid {pid}"),
                reason: std::io::Error::last_os_error().to_string(),
            })
        }
    }

    /// Send SIGTERM to process for graceful shutdown
    #[cfg(unix)]
    pub fn send_sigterm(pid: u32) -> Result<(), ServiceError> {
        Self::send_signal(pid, libc::SIGTERM)
    }

    /// Send SIGKILL to process for force shutdown
    #[cfg(unix)]
    pub fn send_sigkill(pid: u32) -> Result<(), ServiceError> {
        Self::send_signal(pid, libc::SIGKILL)
    }

    /// Poll until the process is gone or `timeout` elapses
    pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !Self::is_process_running(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    /// Stop a process we do not own: polite request, grace period, then force
    pub async fn terminate_pid(pid: u32, grace: Duration) -> Result<(), ServiceError> {
        if !Self::is_process_running(pid) {
            debug!(pid, "Process already gone");
            return Ok(());
        }

        #[cfg(unix)]
        {
            info!(pid, "Sending SIGTERM");
            Self::send_sigterm(pid)?;
            if Self::wait_for_exit(pid, grace).await {
                return Ok(());
            }

            warn!(pid, grace_ms = grace.as_millis() as u64, "Process ignored SIGTERM, sending SIGKILL");
            Self::send_sigkill(pid)?;
        }

        #[cfg(windows)]
        {
            let _ = grace;
            info!(pid, "Running taskkill");
            let output = tokio::process::Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/F"])
                .output()
                .await?;
            if !output.status.success() {
                return Err(ServiceError::ProcessKillFailed {
                    service: format!("pid {pid}"),
                    reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
        }

        if Self::wait_for_exit(pid, Duration::from_secs(2)).await {
            Ok(())
        } else {
            Err(ServiceError::ProcessKillFailed {
                service: format!("pid {pid}"),
                reason: "process still alive after forced kill".to_string(),
            })
        }
    }
}
