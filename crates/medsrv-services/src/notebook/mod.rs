//! Notebook server management.
//!
//! Startup: resolve the python runtime, confirm the notebook package is
//! installed for it, make sure its config file exists and carries the
//! required directives, spawn the server on the fixed port, then wait for it
//! to answer. Stopping and status work from the port so a server left over
//! from an earlier gateway is handled the same way as one we spawned.

mod config_patch;
mod stop;

pub use config_patch::{apply_config_patch, patch_config_text, REQUIRED_DIRECTIVES};
pub use stop::{
    kill_command, parse_listener_pid, parse_lsof_pid, parse_netstat_pid, pid_lookup_command,
    StopAttempt, StopReport, StopStrategy,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use medsrv_types::{NotebookStatus, PythonPackage, RequirementReport};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::locator::{BinaryLocator, ServiceBinary};
use crate::platform::Platform;
use crate::port::is_port_free;
use crate::process::{
    OutputLine, OutputStream, ProbeCommand, ProbeRunner, ProcessSpec, ServiceProcessHandle,
};
use crate::python_env;

const SERVICE: &str = "jupyter";
const PACKAGE: &str = "notebook";
const CONFIG_FILE: &str = "jupyter_notebook_config.py";
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);
const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
/// How long to wait for the last output lines of a server that exited
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// True if `line` mentions `port` as a whole number, not as part of a longer one
pub fn announces_port(line: &str, port: u16) -> bool {
    let needle = port.to_string();
    let bytes = line.as_bytes();
    line.match_indices(&needle).any(|(start, _)| {
        let end = start + needle.len();
        let digit_before = start > 0 && bytes[start - 1].is_ascii_digit();
        let digit_after = bytes.get(end).is_some_and(u8::is_ascii_digit);
        !digit_before && !digit_after
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookStarted {
    pub pid: u32,
    pub port: u16,
    pub config_path: PathBuf,
    /// False when a server spawned earlier by this manager was still alive
    pub spawned: bool,
}

pub struct NotebookManager {
    locator: Arc<BinaryLocator>,
    runner: Arc<dyn ProbeRunner>,
    http: reqwest::Client,
    platform: Platform,
    port: u16,
    ready_timeout: Duration,
    shutdown_timeout: Duration,
    python_override: Option<PathBuf>,
    handle: Mutex<Option<ServiceProcessHandle>>,
}

impl NotebookManager {
    pub fn new(
        locator: Arc<BinaryLocator>,
        runner: Arc<dyn ProbeRunner>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            platform: locator.platform(),
            locator,
            runner,
            http: reqwest::Client::new(),
            port: config.notebook_port,
            ready_timeout: config.notebook_ready_timeout,
            shutdown_timeout: config.shutdown_timeout,
            python_override: config.python.clone(),
            handle: Mutex::new(None),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Python interpreter the notebook server runs on
    pub fn resolve_runtime(&self) -> Result<PathBuf, ServiceError> {
        if let Some(python) = &self.python_override {
            return if python.is_file() {
                Ok(python.clone())
            } else {
                Err(ServiceError::RuntimeNotFound {
                    runtime: format!("python ({} does not exist)", python.display()),
                })
            };
        }

        self.locator
            .locate(ServiceBinary::Python)
            .ok_or_else(|| ServiceError::RuntimeNotFound {
                runtime: "python".to_string(),
            })
    }

    /// `requested` if given and present, else the notebook runtime
    pub fn runtime_for(&self, requested: Option<&Path>) -> Result<PathBuf, ServiceError> {
        match requested {
            Some(python) if python.is_file() => Ok(python.to_path_buf()),
            Some(python) => Err(ServiceError::RuntimeNotFound {
                runtime: format!("python ({} does not exist)", python.display()),
            }),
            None => self.resolve_runtime(),
        }
    }

    /// Packages installed for `python`, per `pip list`
    pub async fn installed_packages(&self, python: &Path) -> Result<Vec<PythonPackage>, ServiceError> {
        let command = python_env::pip_list_command(python);
        let output = self.runner.run(&command).await?;
        if !output.success() {
            debug!(command = %command, code = ?output.code, stderr = %output.stderr.trim(), "pip list failed");
            return Err(ServiceError::PackageNotInstalled {
                package: "pip".to_string(),
                runtime: python.to_path_buf(),
            });
        }

        python_env::parse_pip_list(&output.stdout).map_err(|e| ServiceError::UnexpectedOutput {
            command: command.to_string(),
            reason: e.to_string(),
        })
    }

    /// Required packages not installed for `python`
    pub async fn missing_python_packages(&self, python: &Path) -> Result<Vec<String>, ServiceError> {
        let installed = self.installed_packages(python).await?;
        Ok(python_env::missing_packages(
            &installed,
            python_env::REQUIRED_PYTHON_PACKAGES,
        ))
    }

    fn jupyter(&self, python: &Path) -> ProbeCommand {
        ProbeCommand::new(python).args(["-m", "jupyter"])
    }

    /// Confirm `jupyter --version` runs and names itself
    pub async fn verify_package(&self, python: &Path) -> Result<(), ServiceError> {
        let not_installed = || ServiceError::PackageNotInstalled {
            package: PACKAGE.to_string(),
            runtime: python.to_path_buf(),
        };

        let output = self
            .runner
            .run(&self.jupyter(python).arg("--version"))
            .await
            .map_err(|e| {
                debug!(error = %e, "Notebook version probe failed to run");
                not_installed()
            })?;

        let has_marker = output
            .stdout
            .lines()
            .any(|line| line.trim_start().starts_with("jupyter"));

        if output.success() && has_marker {
            Ok(())
        } else {
            Err(not_installed())
        }
    }

    /// Requirement report for the notebook package; resolved to the runtime path when usable
    pub async fn package_report(&self) -> RequirementReport {
        let resolved = match self.resolve_runtime() {
            Ok(python) => self.verify_package(&python).await.ok().map(|_| python),
            Err(_) => None,
        };
        RequirementReport::new(SERVICE, resolved)
    }

    /// Locate, create if needed, and patch the notebook config file
    pub async fn ensure_config(&self, python: &Path) -> Result<PathBuf, ServiceError> {
        let paths = self.runner.run(&self.jupyter(python).arg("--paths")).await?;
        let config_dir = paths
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| line.contains(".jupyter"))
            .map(PathBuf::from)
            .ok_or_else(|| ServiceError::PackageNotInstalled {
                package: PACKAGE.to_string(),
                runtime: python.to_path_buf(),
            })?;

        let config_path = config_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            info!(path = %config_path.display(), "Generating notebook config");
            let generated = self
                .runner
                .run(&self.jupyter(python).args(["notebook", "--generate-config"]))
                .await;
            if let Err(e) = &generated {
                warn!(error = %e, "Config generation failed, creating an empty config");
            }
            if !config_path.exists() {
                std::fs::create_dir_all(&config_dir)?;
                std::fs::write(&config_path, "")?;
            }
        }

        config_patch::apply_config_patch(&config_path)?;
        Ok(config_path)
    }

    /// Start the server for `workspace` and wait until it answers
    pub async fn start(&self, workspace: &Path) -> Result<NotebookStarted, ServiceError> {
        let mut owned = self.handle.lock().await;

        let python = self.resolve_runtime()?;
        self.verify_package(&python).await?;
        let config_path = self.ensure_config(&python).await?;

        if let Some(handle) = owned.as_mut() {
            if !handle.has_exited() {
                info!(service = SERVICE, pid = handle.pid(), "Notebook server already running");
                return Ok(NotebookStarted {
                    pid: handle.pid(),
                    port: self.port,
                    config_path,
                    spawned: false,
                });
            }
        }

        let data_dir = workspace.join("DATA");
        std::fs::create_dir_all(&data_dir)?;

        let spec = ProcessSpec::new(SERVICE, &python)
            .with_args([
                "-m",
                "jupyter",
                "notebook",
                "--NotebookApp.token=",
                "--NotebookApp.password=",
                "--no-browser",
            ])
            .with_arg(format!("--port={}", self.port))
            .with_arg(data_dir.as_os_str())
            .with_working_dir(workspace);

        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = ServiceProcessHandle::spawn(spec, Some(tx))?;

        if let Err(e) = self.wait_until_ready(&mut handle, rx).await {
            warn!(service = SERVICE, pid = handle.pid(), error = %e, "Notebook server failed to become ready");
            if let Err(stop_err) = handle.terminate(self.shutdown_timeout).await {
                warn!(service = SERVICE, error = %stop_err, "Failed to stop unready notebook server");
            }
            return Err(e);
        }

        let pid = handle.pid();
        info!(service = SERVICE, pid, port = self.port, "Notebook server ready");
        *owned = Some(handle);

        Ok(NotebookStarted {
            pid,
            port: self.port,
            config_path,
            spawned: true,
        })
    }

    async fn wait_until_ready(
        &self,
        handle: &mut ServiceProcessHandle,
        mut lines: mpsc::UnboundedReceiver<OutputLine>,
    ) -> Result<(), ServiceError> {
        let deadline = tokio::time::sleep(self.ready_timeout);
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval(HEALTH_POLL_INTERVAL);
        let mut lines_open = true;

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Err(ServiceError::ReadinessTimeout {
                        service: SERVICE.to_string(),
                        timeout_ms: self.ready_timeout.as_millis() as u64,
                        stderr: handle.stderr_tail(),
                    });
                }
                code = handle.wait() => {
                    // The sender closes once both output pumps hit EOF
                    if lines_open {
                        let drained = async { while lines.recv().await.is_some() {} };
                        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, drained).await;
                    }
                    return Err(ServiceError::ExitedEarly {
                        service: SERVICE.to_string(),
                        code,
                        stderr: handle.stderr_tail(),
                    });
                }
                line = lines.recv(), if lines_open => match line {
                    Some(OutputLine { stream: OutputStream::Stderr, line }) if announces_port(&line, self.port) => {
                        debug!(service = SERVICE, "Port announced on stderr");
                        return Ok(());
                    }
                    Some(_) => {}
                    None => lines_open = false,
                },
                _ = poll.tick() => {
                    if self.api_responds().await {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn api_responds(&self) -> bool {
        let url = format!("http://127.0.0.1:{}/api", self.port);
        match self
            .http
            .get(&url)
            .timeout(HEALTH_REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Stop whatever server listens on the notebook port.
    ///
    /// A report with no `stopped_by` means nothing was running: every
    /// strategy failed, no spawned process was left and the port is free.
    pub async fn stop(&self) -> Result<StopReport, ServiceError> {
        let mut owned = self.handle.lock().await;
        let mut attempts = Vec::new();

        for strategy in StopStrategy::ORDER {
            match self.attempt(strategy).await {
                Ok(detail) => {
                    info!(service = SERVICE, ?strategy, %detail, "Notebook server stopped");
                    attempts.push(StopAttempt {
                        strategy,
                        succeeded: true,
                        detail,
                    });
                    self.reap_owned(&mut owned).await;
                    return Ok(StopReport {
                        stopped_by: Some(strategy),
                        attempts,
                    });
                }
                Err(detail) => {
                    warn!(service = SERVICE, ?strategy, %detail, "Stop strategy failed");
                    attempts.push(StopAttempt {
                        strategy,
                        succeeded: false,
                        detail,
                    });
                }
            }
        }

        let had_owned = owned.is_some();
        if had_owned && self.reap_owned(&mut owned).await {
            attempts.push(StopAttempt {
                strategy: StopStrategy::OwnedProcess,
                succeeded: true,
                detail: "terminated spawned process".to_string(),
            });
            return Ok(StopReport {
                stopped_by: Some(StopStrategy::OwnedProcess),
                attempts,
            });
        }

        if !had_owned && is_port_free(self.port) {
            info!(service = SERVICE, port = self.port, "No notebook server running");
            return Ok(StopReport {
                stopped_by: None,
                attempts,
            });
        }

        Err(ServiceError::ProcessKillFailed {
            service: SERVICE.to_string(),
            reason: attempts
                .iter()
                .map(|attempt| attempt.detail.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        })
    }

    async fn attempt(&self, strategy: StopStrategy) -> Result<String, String> {
        match strategy {
            StopStrategy::KillByPort => {
                let lookup = stop::pid_lookup_command(self.platform, self.port);
                let output = self
                    .runner
                    .run(&lookup)
                    .await
                    .map_err(|e| format!("'{lookup}' failed: {e}"))?;
                let pid = stop::parse_listener_pid(self.platform, &output.stdout, self.port)
                    .ok_or_else(|| format!("no process listening on port {}", self.port))?;

                let kill = stop::kill_command(self.platform, pid);
                let output = self
                    .runner
                    .run(&kill)
                    .await
                    .map_err(|e| format!("'{kill}' failed: {e}"))?;
                if output.success() {
                    Ok(format!("killed pid {pid}"))
                } else {
                    Err(format!("'{kill}' exited with {:?}: {}", output.code, output.stderr.trim()))
                }
            }
            StopStrategy::StopSubcommand => {
                let python = self.resolve_runtime().map_err(|e| e.to_string())?;
                let command = self
                    .jupyter(&python)
                    .args(["notebook", "stop", &self.port.to_string()]);
                let output = self
                    .runner
                    .run(&command)
                    .await
                    .map_err(|e| format!("'{command}' failed: {e}"))?;
                if output.success() {
                    Ok(format!("stopped via '{command}'"))
                } else {
                    Err(format!(
                        "'{command}' exited with {:?}: {}",
                        output.code,
                        output.stderr.trim()
                    ))
                }
            }
            StopStrategy::OwnedProcess => Err("not an external strategy".to_string()),
        }
    }

    /// Terminate and drop the spawned handle, if any; true if one was stopped
    async fn reap_owned(&self, owned: &mut Option<ServiceProcessHandle>) -> bool {
        let Some(mut handle) = owned.take() else {
            return false;
        };
        match handle.terminate(self.shutdown_timeout).await {
            Ok(_) => true,
            Err(e) => {
                warn!(service = SERVICE, pid = handle.pid(), error = %e, "Failed to stop spawned notebook server");
                false
            }
        }
    }

    /// Whether a notebook server answers on the port, per the notebook's own listing
    pub async fn status(&self) -> NotebookStatus {
        let python = match self.resolve_runtime() {
            Ok(python) => python,
            Err(e) => return NotebookStatus::stopped(e.to_string()),
        };

        let command = self.jupyter(&python).args(["notebook", "list"]);
        match self.runner.run(&command).await {
            Ok(output) if output.combined().contains(&format!(":{}", self.port)) => {
                NotebookStatus::running()
            }
            Ok(_) => NotebookStatus::stopped("Jupyter server is not running"),
            Err(e) => {
                debug!(error = %e, "Notebook list probe failed");
                NotebookStatus::stopped(format!("Jupyter server is not running: {e}"))
            }
        }
    }

    /// Whether the process this manager spawned is still alive
    pub async fn owns_running_process(&self) -> bool {
        let mut owned = self.handle.lock().await;
        let alive = owned.as_mut().is_some_and(|handle| !handle.has_exited());
        if !alive {
            *owned = None;
        }
        alive
    }

    /// Stop the spawned process, if any, without touching anything else on the port
    pub async fn shutdown(&self) {
        let mut owned = self.handle.lock().await;
        self.reap_owned(&mut owned).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("[I 10:02:11 NotebookApp] http://localhost:8900/tree", true)]
    #[case("Serving notebooks on port 8900", true)]
    #[case("8900", true)]
    #[case("[I NotebookApp] http://localhost:18900/tree", false)]
    #[case("http://127.0.0.1:89001/", false)]
    #[case("pid 89000 started, retrying 8900x", true)]
    #[case("kernel 1890 ready", false)]
    fn port_must_stand_alone(#[case] line: &str, #[case] expected: bool) {
        assert_eq!(announces_port(line, 8900), expected);
    }
}
