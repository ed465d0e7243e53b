//! One-shot external commands and the runner seam used to execute them.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// A short-lived external command whose output is inspected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProbeCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for ProbeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProbeOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Runs probe commands; the managers only talk to the host through this.
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    async fn run(&self, command: &ProbeCommand) -> io::Result<ProbeOutput>;
}

/// [`ProbeRunner`] backed by real child processes
#[derive(Debug, Clone)]
pub struct SystemProbeRunner {
    timeout: Duration,
}

impl SystemProbeRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ProbeRunner for SystemProbeRunner {
    async fn run(&self, command: &ProbeCommand) -> io::Result<ProbeOutput> {
        debug!(command = %command, "Running probe");

        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("'{command}' timed out after {}ms", self.timeout.as_millis()),
                )
            })??;

        Ok(ProbeOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_exit_code_and_streams() {
        let runner = SystemProbeRunner::new(Duration::from_secs(5));
        let output = runner
            .run(&ProbeCommand::new("sh").args(["-c", "echo out; echo err >&2; exit 2"]))
            .await
            .unwrap();

        assert_eq!(output.code, Some(2));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn slow_commands_time_out() {
        let runner = SystemProbeRunner::new(Duration::from_millis(100));
        let err = runner
            .run(&ProbeCommand::new("sleep").arg("5"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
