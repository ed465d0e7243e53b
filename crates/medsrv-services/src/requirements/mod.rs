//! Requirement checks and optional installation.
//!
//! A missing prerequisite never stops the gateway. The checker reports what
//! is missing and, depending on the install policy, offers to install it.

mod installer;

pub use installer::{
    parse_os_release, unpack_tarball, verify_checksum, InstallStrategy, MongoInstaller, OsRelease,
};

use std::io::{BufRead, IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use medsrv_types::{InstallOutcome, RequirementReport, RequirementSummary};
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::locator::{BinaryLocator, ServiceBinary};
use crate::notebook::NotebookManager;
use crate::process::{ProbeRunner, SystemProbeRunner};
use crate::python_env;

/// Installers download and build; give them far longer than a probe
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// How to answer "install the missing requirement?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPolicy {
    /// Ask on the terminal
    Prompt,
    Always,
    Never,
}

impl InstallPolicy {
    /// Scripted answer if configured, otherwise prompt only when stdin is a terminal
    pub fn from_config(auto_install: Option<bool>) -> Self {
        match auto_install {
            Some(true) => InstallPolicy::Always,
            Some(false) => InstallPolicy::Never,
            None if std::io::stdin().is_terminal() => InstallPolicy::Prompt,
            None => InstallPolicy::Never,
        }
    }
}

/// Ask `question` with a `(Y/n)` suffix; an empty answer means yes
pub fn prompt_yes_no<R: BufRead, W: Write>(question: &str, input: &mut R, output: &mut W) -> bool {
    if write!(output, "{question} (Y/n) ").and_then(|_| output.flush()).is_err() {
        return false;
    }

    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(0) | Err(_) => false,
        Ok(_) => {
            let answer = answer.trim();
            answer.is_empty() || answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
        }
    }
}

pub struct RequirementChecker {
    locator: Arc<BinaryLocator>,
    notebook: Arc<NotebookManager>,
    installer: MongoInstaller,
    runner: Arc<dyn ProbeRunner>,
    policy: InstallPolicy,
}

impl RequirementChecker {
    pub fn new(
        locator: Arc<BinaryLocator>,
        notebook: Arc<NotebookManager>,
        config: &ServiceConfig,
    ) -> Self {
        let runner: Arc<dyn ProbeRunner> = Arc::new(SystemProbeRunner::new(INSTALL_TIMEOUT));
        Self::with_runner(locator, notebook, config, runner)
    }

    pub fn with_runner(
        locator: Arc<BinaryLocator>,
        notebook: Arc<NotebookManager>,
        config: &ServiceConfig,
        runner: Arc<dyn ProbeRunner>,
    ) -> Self {
        let installer = MongoInstaller::new(
            runner.clone(),
            locator.platform(),
            config.data_dir.clone(),
            config.downloads_dir.clone(),
        );

        Self {
            locator,
            notebook,
            installer,
            runner,
            policy: InstallPolicy::from_config(config.auto_install),
        }
    }

    pub fn with_policy(mut self, policy: InstallPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Probe every requirement without installing anything
    pub async fn check(&self) -> RequirementSummary {
        let mongod = RequirementReport::new(
            ServiceBinary::Mongod.service_name(),
            self.locator.locate(ServiceBinary::Mongod),
        );
        let python = RequirementReport::new(
            ServiceBinary::Python.service_name(),
            self.notebook.resolve_runtime().ok(),
        );
        let jupyter = self.notebook.package_report().await;

        RequirementSummary {
            reports: vec![mongod, python, jupyter],
            installs: Vec::new(),
        }
    }

    /// Check, offer installs for what is missing, then check again
    pub async fn check_and_install(&self) -> RequirementSummary {
        let before = self.check().await;
        let mut installs = Vec::new();

        for report in before.missing() {
            let service = report.service_name.as_str();
            let outcome = match service {
                "mongod" => {
                    if !self.confirm("MongoDB is not installed. Install it now?").await {
                        InstallOutcome::Declined {
                            service_name: service.to_string(),
                        }
                    } else {
                        outcome(service, self.install_mongo().await)
                    }
                }
                "jupyter" if before.reports.iter().any(|r| r.service_name == "python" && r.is_present()) => {
                    if !self
                        .confirm("The Jupyter notebook package is not installed. Install it now?")
                        .await
                    {
                        InstallOutcome::Declined {
                            service_name: service.to_string(),
                        }
                    } else {
                        outcome(service, self.install_notebook_package().await)
                    }
                }
                _ => {
                    warn!(service, "Requirement missing and cannot be installed automatically");
                    continue;
                }
            };
            installs.push(outcome);
        }

        if installs.is_empty() {
            return before;
        }

        let mut after = self.check().await;
        after.installs = installs;
        after
    }

    pub async fn install_mongo(&self) -> Result<(), ServiceError> {
        self.installer.install().await
    }

    /// `python -m pip install notebook` for the resolved runtime
    pub async fn install_notebook_package(&self) -> Result<(), ServiceError> {
        let python = self.notebook.resolve_runtime()?;
        self.pip_install(&python, &["notebook"], "jupyter").await
    }

    /// Install whatever required python packages `python` lacks; returns what was installed
    pub async fn install_python_packages(&self, python: Option<&Path>) -> Result<Vec<String>, ServiceError> {
        let python = self.notebook.runtime_for(python)?;
        let missing = self.notebook.missing_python_packages(&python).await?;
        if missing.is_empty() {
            info!(python = %python.display(), "Python requirements already met");
            return Ok(missing);
        }

        self.pip_install(&python, &missing, "python packages").await?;
        Ok(missing)
    }

    async fn pip_install<S: AsRef<str>>(
        &self,
        python: &Path,
        packages: &[S],
        service: &str,
    ) -> Result<(), ServiceError> {
        let command = python_env::pip_install_command(python, packages);
        info!(command = %command, "Installing python packages");

        let output = self
            .runner
            .run(&command)
            .await
            .map_err(|e| ServiceError::install_failed(service, e))?;
        if output.success() {
            Ok(())
        } else {
            Err(ServiceError::install_failed(
                service,
                format!("pip exited with {:?}: {}", output.code, output.stderr.trim()),
            ))
        }
    }

    async fn confirm(&self, question: &str) -> bool {
        match self.policy {
            InstallPolicy::Always => true,
            InstallPolicy::Never => {
                info!(question, "Skipping install (non-interactive)");
                false
            }
            InstallPolicy::Prompt => {
                let question = question.to_string();
                tokio::task::spawn_blocking(move || {
                    let stdin = std::io::stdin();
                    let mut stderr = std::io::stderr();
                    prompt_yes_no(&question, &mut stdin.lock(), &mut stderr)
                })
                .await
                .unwrap_or(false)
            }
        }
    }
}

fn outcome(service: &str, result: Result<(), ServiceError>) -> InstallOutcome {
    match result {
        Ok(()) => {
            info!(service, "Installed");
            InstallOutcome::Installed {
                service_name: service.to_string(),
            }
        }
        Err(e) => {
            warn!(service, error = %e, "Install failed");
            InstallOutcome::Failed {
                service_name: service.to_string(),
                error: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn empty_answer_defaults_to_yes() {
        let mut out = Vec::new();
        assert!(prompt_yes_no("Install?", &mut Cursor::new("\n"), &mut out));
        assert_eq!(String::from_utf8(out).unwrap(), "Install? (Y/n) ");
    }

    #[test]
    fn explicit_answers() {
        let mut sink = Vec::new();
        assert!(prompt_yes_no("q", &mut Cursor::new("Y\n"), &mut sink));
        assert!(!prompt_yes_no("q", &mut Cursor::new("n\n"), &mut sink));
        assert!(!prompt_yes_no("q", &mut Cursor::new("nope\n"), &mut sink));
        // closed stdin is not consent
        assert!(!prompt_yes_no("q", &mut Cursor::new(""), &mut sink));
    }

    #[test]
    fn scripted_policy_wins_over_terminal() {
        assert_eq!(InstallPolicy::from_config(Some(true)), InstallPolicy::Always);
        assert_eq!(InstallPolicy::from_config(Some(false)), InstallPolicy::Never);
    }
}
