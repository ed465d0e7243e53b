use std::ffi::OsString;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use medsrv_types::READY_ADDR_ENV;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::error::SupervisorError;

pub const GATEWAY_BIN_NAME: &str = "medsrv-gateway";

/// Find the gateway executable: an explicit path, then next to the running
/// binary, then on `PATH`.
pub fn resolve_gateway_binary(explicit: Option<&Path>) -> Result<PathBuf, SupervisorError> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(SupervisorError::GatewayNotFound(path.display().to_string()))
        };
    }

    let file_name = format!("{GATEWAY_BIN_NAME}{}", std::env::consts::EXE_SUFFIX);

    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let sibling = dir.join(&file_name);
        if sibling.is_file() {
            return Ok(sibling);
        }
    }

    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(&file_name))
                .find(|candidate| candidate.is_file())
        })
        .ok_or_else(|| SupervisorError::GatewayNotFound(format!("{file_name} (not beside medsrv or on PATH)")))
}

/// How to start one gateway child.
#[derive(Debug, Clone)]
pub struct GatewayLaunch {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub production: bool,
    pub log_path: PathBuf,
}

impl GatewayLaunch {
    pub fn new(program: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            production: false,
            log_path: log_path.into(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// Spawn detached from the terminal with output appended to the log file.
    pub fn spawn(&self, ready_addr: SocketAddr) -> Result<Child, SupervisorError> {
        if let Some(parent) = self.log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(READY_ADDR_ENV, ready_addr.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));
        if self.production {
            cmd.env("MEDSRV_ENV", "production");
        }
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(program = %self.program.display(), %ready_addr, "Spawning gateway");
        let child = cmd.spawn()?;
        info!(pid = ?child.id(), log = %self.log_path.display(), "Gateway spawned");
        Ok(child)
    }
}

/// Last `lines` lines of the child log, for diagnostics after a failed start.
pub fn log_tail(path: &Path, lines: usize) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let all: Vec<&str> = content.lines().collect();
    all[all.len().saturating_sub(lines)..]
        .iter()
        .map(|line| line.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_binary_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            resolve_gateway_binary(Some(&missing)),
            Err(SupervisorError::GatewayNotFound(_))
        ));

        let present = dir.path().join("gw");
        std::fs::write(&present, "").unwrap();
        assert_eq!(resolve_gateway_binary(Some(&present)).unwrap(), present);
    }

    #[test]
    fn log_tail_keeps_last_lines() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("server-child.log");
        std::fs::write(&log, "a\nb\nc\nd\n").unwrap();
        assert_eq!(log_tail(&log, 2), vec!["c", "d"]);
        assert_eq!(log_tail(&log, 10).len(), 4);
        assert!(log_tail(&dir.path().join("missing"), 3).is_empty());
    }
}
