//! Long-running child processes with captured output.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::error::ServiceError;

const TAIL_CAPACITY: usize = 200;

/// What to launch for a managed service
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

/// Last lines written by a child, kept for diagnostics
#[derive(Debug, Clone, Default)]
pub struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl OutputTail {
    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == TAIL_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

/// A spawned service process owned by exactly one manager.
///
/// Dropping the handle kills the child, so a manager that loses its handle
/// cannot leak the process.
pub struct ServiceProcessHandle {
    name: String,
    child: Child,
    pid: u32,
    started_at: DateTime<Utc>,
    stderr: OutputTail,
    exit_code: Option<i32>,
    exited: bool,
}

impl ServiceProcessHandle {
    /// Spawn `spec` with piped output; every output line is logged and, if
    /// given, forwarded to `observer`. Stderr lines are also kept in a tail.
    pub fn spawn(
        spec: ProcessSpec,
        observer: Option<mpsc::UnboundedSender<OutputLine>>,
    ) -> Result<Self, ServiceError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| {
            error!(service = %spec.name, program = %spec.program.display(), error = %source, "Failed to spawn process");
            ServiceError::SpawnFailed {
                service: spec.name.clone(),
                source,
            }
        })?;

        let pid = child.id().unwrap_or_default();
        let stderr = OutputTail::default();

        if let Some(out) = child.stdout.take() {
            pump(out, &spec.name, OutputStream::Stdout, None, observer.clone());
        }
        if let Some(err) = child.stderr.take() {
            pump(err, &spec.name, OutputStream::Stderr, Some(stderr.clone()), observer);
        }

        info!(service = %spec.name, pid, program = %spec.program.display(), "Process started");

        Ok(Self {
            name: spec.name,
            child,
            pid,
            started_at: Utc::now(),
            stderr,
            exit_code: None,
            exited: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr.lines()
    }

    /// Non-blocking check; records the exit code the first time exit is seen
    pub fn has_exited(&mut self) -> bool {
        if self.exited {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.record_exit(status.code());
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(service = %self.name, pid = self.pid, error = %e, "Failed to poll process");
                false
            }
        }
    }

    /// Wait for the child to exit on its own
    pub async fn wait(&mut self) -> Option<i32> {
        if !self.exited {
            match self.child.wait().await {
                Ok(status) => self.record_exit(status.code()),
                Err(e) => {
                    warn!(service = %self.name, pid = self.pid, error = %e, "Failed to wait for process");
                    self.record_exit(None);
                }
            }
        }
        self.exit_code
    }

    /// Graceful stop: SIGTERM (hard kill on Windows), wait `grace`, then kill
    pub async fn terminate(&mut self, grace: Duration) -> Result<Option<i32>, ServiceError> {
        if self.has_exited() {
            return Ok(self.exit_code);
        }

        info!(service = %self.name, pid = self.pid, "Stopping process");

        #[cfg(unix)]
        if let Err(e) = super::ProcessUtils::send_sigterm(self.pid) {
            warn!(service = %self.name, pid = self.pid, error = %e, "SIGTERM failed");
        }

        #[cfg(not(unix))]
        if let Err(e) = self.child.start_kill() {
            warn!(service = %self.name, pid = self.pid, error = %e, "Kill request failed");
        }

        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.record_exit(status.code());
            }
            Ok(Err(e)) => {
                return Err(ServiceError::ProcessKillFailed {
                    service: self.name.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(
                    service = %self.name,
                    pid = self.pid,
                    grace_ms = grace.as_millis() as u64,
                    "Process did not stop in time, killing"
                );
                self.child
                    .kill()
                    .await
                    .map_err(|e| ServiceError::ProcessKillFailed {
                        service: self.name.clone(),
                        reason: e.to_string(),
                    })?;
                let code = self.child.try_wait().ok().flatten().and_then(|s| s.code());
                self.record_exit(code);
            }
        }

        info!(service = %self.name, pid = self.pid, exit_code = ?self.exit_code, "Process stopped");
        Ok(self.exit_code)
    }

    fn record_exit(&mut self, code: Option<i32>) {
        self.exited = true;
        self.exit_code = code;
    }
}

impl std::fmt::Debug for ServiceProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProcessHandle")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("started_at", &self.started_at)
            .field("exit_code", &self.exit_code)
            .finish()
    }
}

fn pump<R>(
    reader: R,
    service: &str,
    stream: OutputStream,
    tail: Option<OutputTail>,
    observer: Option<mpsc::UnboundedSender<OutputLine>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let service = service.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    info!(service = %service, stream = stream.as_str(), "{line}");
                    if let Some(tx) = &observer {
                        let _ = tx.send(OutputLine {
                            stream,
                            line: line.clone(),
                        });
                    }
                    if let Some(tail) = &tail {
                        tail.push(line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(service = %service, stream = stream.as_str(), error = %e, "Output stream error");
                    break;
                }
            }
        }
    });
}
