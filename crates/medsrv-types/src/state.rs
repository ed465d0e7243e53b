use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted record of a running gateway.
///
/// Written by the supervisor after a successful handshake and read back by
/// `status`, `ensure`, `install` and `stop`. Older or partial files may lack
/// any field, so everything except `running` is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorState {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(rename = "expressPort", default)]
    pub gateway_port: Option<u16>,
    #[serde(rename = "started", default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl SupervisorState {
    pub fn running(pid: u32, gateway_port: u16) -> Self {
        Self {
            running: true,
            pid: Some(pid),
            gateway_port: Some(gateway_port),
            started_at: Some(Utc::now()),
        }
    }

    /// Base URL of the gateway recorded in this state, if a port is known.
    pub fn gateway_url(&self) -> Option<String> {
        self.gateway_port
            .map(|port| format!("http://127.0.0.1:{port}"))
    }
}
