use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::PathBuf;

/// Inclusive range of TCP ports to search when allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPortRange")]
pub struct PortRange {
    start: u16,
    end: u16,
}

/// Unchecked wire form; deserialization goes through [`PortRange::new`]
#[derive(Deserialize)]
struct RawPortRange {
    start: u16,
    end: u16,
}

impl TryFrom<RawPortRange> for PortRange {
    type Error = PortRangeError;

    fn try_from(raw: RawPortRange) -> Result<Self, Self::Error> {
        PortRange::new(raw.start, raw.end)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid port range {start}-{end}: start must not exceed end")]
pub struct PortRangeError {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    /// Gateway ports: the same window the desktop app has always used.
    pub const GATEWAY: PortRange = PortRange {
        start: 3000,
        end: 8000,
    };

    pub fn new(start: u16, end: u16) -> Result<Self, PortRangeError> {
        if start > end {
            return Err(PortRangeError { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn ports(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::GATEWAY
    }
}

/// `{ "success": bool, ...body }` wrapper used by every gateway response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn ok(body: T) -> Self {
        Self {
            success: true,
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub type ErrorEnvelope = Envelope<ErrorBody>;

impl ErrorEnvelope {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            body: ErrorBody {
                error: error.into(),
            },
        }
    }
}

/// Body of `POST /set-working-directory` and `POST /start-mongo`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRequest {
    #[serde(default)]
    pub workspace_path: Option<String>,
}

/// Query of `GET /get-working-dir-tree`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeQuery {
    #[serde(default)]
    pub requested_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// One entry of a workspace directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub name: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub children: Option<Vec<DirectoryNode>>,
}

/// Lifecycle state of the database process owned by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
    pub state: DatabaseState,
    pub pid: Option<u32>,
    pub workspace: Option<PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
    /// Last stderr lines of the running process, or of the one that exited
    pub recent_output: Vec<String>,
}

/// Body of the python package routes; an absent path means the notebook runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonPathRequest {
    #[serde(default)]
    pub python_path: Option<String>,
}

/// One entry of `pip list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PythonPackage {
    pub name: String,
    pub version: String,
}

/// Notebook server status as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl NotebookStatus {
    pub fn running() -> Self {
        Self {
            running: true,
            error: None,
        }
    }

    pub fn stopped(error: impl Into<String>) -> Self {
        Self {
            running: false,
            error: Some(error.into()),
        }
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    pub pid: u32,
    pub port: u16,
    pub uptime_secs: u64,
    pub working_directory: Option<PathBuf>,
    pub database: DatabaseStatus,
    pub notebook_running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn port_range_rejects_inverted_bounds() {
        assert_eq!(
            PortRange::new(9000, 8000),
            Err(PortRangeError {
                start: 9000,
                end: 8000
            })
        );
        let single = PortRange::new(4000, 4000).unwrap();
        assert_eq!(single.ports().count(), 1);
    }

    #[test]
    fn port_range_deserialization_checks_bounds() {
        let range: PortRange = serde_json::from_value(json!({"start": 5000, "end": 5010})).unwrap();
        assert_eq!((range.start(), range.end()), (5000, 5010));

        let err = serde_json::from_value::<PortRange>(json!({"start": 9000, "end": 8000})).unwrap_err();
        assert!(err.to_string().contains("start must not exceed end"));
    }

    #[test]
    fn envelope_flattens_body() {
        let value = serde_json::to_value(Envelope::ok(NotebookStatus::running())).unwrap();
        assert_eq!(value, json!({"success": true, "running": true}));

        let value = serde_json::to_value(ErrorEnvelope::failure("boom")).unwrap();
        assert_eq!(value, json!({"success": false, "error": "boom"}));
    }

    #[test]
    fn workspace_request_uses_camel_case() {
        let req: WorkspaceRequest =
            serde_json::from_value(json!({"workspacePath": "/tmp/ws"})).unwrap();
        assert_eq!(req.workspace_path.as_deref(), Some("/tmp/ws"));

        let empty: WorkspaceRequest = serde_json::from_value(json!({})).unwrap();
        assert!(empty.workspace_path.is_none());

        let python: PythonPathRequest =
            serde_json::from_value(json!({"pythonPath": "/opt/py/bin/python3"})).unwrap();
        assert_eq!(python.python_path.as_deref(), Some("/opt/py/bin/python3"));
    }
}
