use std::path::PathBuf;

/// Errors raised while locating, starting, stopping or installing services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{service} executable not found in the private install dir, PATH or default locations")]
    BinaryNotFound { service: String },

    #[error("{runtime} runtime not found")]
    RuntimeNotFound { runtime: String },

    #[error("package '{package}' is not installed for runtime {runtime}")]
    PackageNotInstalled { package: String, runtime: PathBuf },

    #[error("config file does not exist: {path}")]
    ConfigMissing { path: PathBuf },

    #[error("no free port in range {start}-{end}")]
    NoPortAvailable { start: u16, end: u16 },

    #[error("failed to stop {service}: {reason}")]
    ProcessKillFailed { service: String, reason: String },

    #[error("invalid path: {message}")]
    PathInvalid { message: String },

    #[error("failed to spawn {service}: {source}")]
    SpawnFailed {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{service} did not become ready within {timeout_ms}ms{}", stderr_suffix(.stderr))]
    ReadinessTimeout {
        service: String,
        timeout_ms: u64,
        stderr: Vec<String>,
    },

    #[error("{service} exited before becoming ready (exit code {code:?}){}", stderr_suffix(.stderr))]
    ExitedEarly {
        service: String,
        code: Option<i32>,
        stderr: Vec<String>,
    },

    #[error("unexpected output from '{command}': {reason}")]
    UnexpectedOutput { command: String, reason: String },

    #[error("installation of {service} failed: {reason}")]
    InstallFailed { service: String, reason: String },

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Lines of stderr quoted in readiness failures
const STDERR_QUOTE_LINES: usize = 5;

fn stderr_suffix(stderr: &[String]) -> String {
    let start = stderr.len().saturating_sub(STDERR_QUOTE_LINES);
    match &stderr[start..] {
        [] => String::new(),
        quoted => format!("; stderr: {}", quoted.join(" | ")),
    }
}

impl ServiceError {
    pub fn install_failed(service: impl Into<String>, reason: impl ToString) -> Self {
        ServiceError::InstallFailed {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors caused by bad caller input rather than the environment.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServiceError::PathInvalid { .. } | ServiceError::ConfigMissing { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_errors_quote_the_last_stderr_lines() {
        let err = ServiceError::ExitedEarly {
            service: "jupyter".to_string(),
            code: Some(1),
            stderr: (1..=7).map(|n| format!("line {n}")).collect(),
        };
        assert_eq!(
            err.to_string(),
            "jupyter exited before becoming ready (exit code Some(1)); stderr: line 3 | line 4 | line 5 | line 6 | line 7"
        );

        let quiet = ServiceError::ReadinessTimeout {
            service: "jupyter".to_string(),
            timeout_ms: 700,
            stderr: Vec::new(),
        };
        assert_eq!(quiet.to_string(), "jupyter did not become ready within 700ms");
    }
}
