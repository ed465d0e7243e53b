//! Stop strategies for the notebook server.
//!
//! The server may have been started by an earlier gateway, so stopping works
//! from the port rather than from a handle: find the listening pid and kill
//! it, or fall back to the notebook's own stop subcommand. A port nobody
//! listens on after every strategy failed means there was nothing to stop.

use serde::Serialize;

use crate::platform::Platform;
use crate::process::ProbeCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopStrategy {
    /// Look up the pid listening on the port and kill it
    KillByPort,
    /// `python -m jupyter notebook stop <port>`
    StopSubcommand,
    /// Terminate the process this manager spawned
    OwnedProcess,
}

impl StopStrategy {
    /// Tried in order until one succeeds
    pub const ORDER: [StopStrategy; 2] = [StopStrategy::KillByPort, StopStrategy::StopSubcommand];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopAttempt {
    pub strategy: StopStrategy,
    pub succeeded: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopReport {
    /// `None` when no server was running
    pub stopped_by: Option<StopStrategy>,
    pub attempts: Vec<StopAttempt>,
}

impl StopReport {
    pub fn was_running(&self) -> bool {
        self.stopped_by.is_some()
    }
}

pub fn pid_lookup_command(platform: Platform, port: u16) -> ProbeCommand {
    match platform {
        Platform::Windows => ProbeCommand::new("netstat").arg("-ano"),
        _ => ProbeCommand::new("lsof").args(["-t", &format!("-itcp:{port}"), "-sTCP:LISTEN"]),
    }
}

pub fn kill_command(platform: Platform, pid: u32) -> ProbeCommand {
    match platform {
        Platform::Windows => ProbeCommand::new("taskkill").args(["/PID", &pid.to_string(), "/F"]),
        _ => ProbeCommand::new("kill").arg(pid.to_string()),
    }
}

/// Parse the output of [`pid_lookup_command`]
pub fn parse_listener_pid(platform: Platform, output: &str, port: u16) -> Option<u32> {
    match platform {
        Platform::Windows => parse_netstat_pid(output, port),
        _ => parse_lsof_pid(output),
    }
}

/// First pid printed by `lsof -t`
pub fn parse_lsof_pid(output: &str) -> Option<u32> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse().ok())
}

/// Pid of the LISTENING row whose local address ends in `:port`
pub fn parse_netstat_pid(output: &str, port: u16) -> Option<u32> {
    let suffix = format!(":{port}");
    output.lines().find_map(|line| {
        let columns: Vec<&str> = line.split_whitespace().collect();
        match columns.as_slice() {
            [_proto, local, _foreign, state, pid]
                if local.ends_with(&suffix) && state.eq_ignore_ascii_case("LISTENING") =>
            {
                pid.parse().ok()
            }
            _ => None,
        }
    })
}
