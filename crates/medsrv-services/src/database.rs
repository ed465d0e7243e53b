//! Database process management.
//!
//! The gateway owns at most one `mongod`. Start and stop are serialized by
//! the manager's lock, so two overlapping start requests can never leave two
//! live database processes behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use medsrv_types::{DatabaseState, DatabaseStatus};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::ServiceError;
use crate::locator::{BinaryLocator, ServiceBinary};
use crate::process::{ProcessSpec, ServiceProcessHandle};

const SERVICE: &str = "mongod";

/// `mongod.conf` location inside a workspace
pub fn config_path(workspace: &Path) -> PathBuf {
    workspace.join(".medomics").join("mongod.conf")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStarted {
    pub pid: u32,
    pub binary: PathBuf,
    pub config_path: PathBuf,
}

#[derive(Debug)]
struct DatabaseInner {
    state: DatabaseState,
    handle: Option<ServiceProcessHandle>,
    workspace: Option<PathBuf>,
    last_exit_code: Option<i32>,
    /// stderr of the last process that went away
    last_stderr: Vec<String>,
}

impl DatabaseInner {
    /// Drop the handle if the process has exited on its own
    fn refresh(&mut self) {
        let exited = self
            .handle
            .as_mut()
            .is_some_and(|handle| handle.has_exited());

        if exited {
            if let Some(handle) = self.handle.take() {
                let stderr = handle.stderr_tail();
                warn!(
                    service = SERVICE,
                    pid = handle.pid(),
                    exit_code = ?handle.exit_code(),
                    last_line = stderr.last().map(String::as_str).unwrap_or_default(),
                    "Database process exited"
                );
                self.retire(&handle);
            }
            self.state = DatabaseState::Stopped;
        }
    }

    fn retire(&mut self, handle: &ServiceProcessHandle) {
        self.last_exit_code = handle.exit_code();
        self.last_stderr = handle.stderr_tail();
    }
}

pub struct DatabaseManager {
    locator: Arc<BinaryLocator>,
    shutdown_timeout: Duration,
    inner: Mutex<DatabaseInner>,
}

impl DatabaseManager {
    pub fn new(locator: Arc<BinaryLocator>, shutdown_timeout: Duration) -> Self {
        Self {
            locator,
            shutdown_timeout,
            inner: Mutex::new(DatabaseInner {
                state: DatabaseState::Stopped,
                handle: None,
                workspace: None,
                last_exit_code: None,
                last_stderr: Vec::new(),
            }),
        }
    }

    /// Start `mongod` for `workspace`, replacing any process this manager owns
    pub async fn start(&self, workspace: &Path) -> Result<DatabaseStarted, ServiceError> {
        let mut inner = self.inner.lock().await;

        let config_path = config_path(workspace);
        if !config_path.is_file() {
            return Err(ServiceError::ConfigMissing { path: config_path });
        }

        let binary = self
            .locator
            .locate(ServiceBinary::Mongod)
            .ok_or_else(|| ServiceError::BinaryNotFound {
                service: SERVICE.to_string(),
            })?;

        if let Some(mut previous) = inner.handle.take() {
            inner.state = DatabaseState::Stopping;
            info!(service = SERVICE, pid = previous.pid(), "Stopping previous database process");
            if let Err(e) = previous.terminate(self.shutdown_timeout).await {
                // Dropping the handle still kills the child
                warn!(service = SERVICE, pid = previous.pid(), error = %e, "Previous database process did not stop cleanly");
            }
            inner.retire(&previous);
        }

        inner.state = DatabaseState::Starting;
        let spec = ProcessSpec::new(SERVICE, &binary)
            .with_arg("--config")
            .with_arg(config_path.as_os_str())
            .with_working_dir(workspace);

        match ServiceProcessHandle::spawn(spec, None) {
            Ok(handle) => {
                let pid = handle.pid();
                inner.handle = Some(handle);
                inner.state = DatabaseState::Running;
                inner.workspace = Some(workspace.to_path_buf());
                info!(service = SERVICE, pid, config = %config_path.display(), "Database started");
                Ok(DatabaseStarted {
                    pid,
                    binary,
                    config_path,
                })
            }
            Err(e) => {
                inner.state = DatabaseState::Stopped;
                Err(e)
            }
        }
    }

    /// Stop the owned process; returns its pid, or `None` if nothing was running
    pub async fn stop(&self) -> Result<Option<u32>, ServiceError> {
        let mut inner = self.inner.lock().await;

        let Some(mut handle) = inner.handle.take() else {
            inner.state = DatabaseState::Stopped;
            return Ok(None);
        };

        inner.state = DatabaseState::Stopping;
        let result = handle.terminate(self.shutdown_timeout).await;
        inner.state = DatabaseState::Stopped;
        inner.retire(&handle);

        result.map(|_| Some(handle.pid()))
    }

    pub async fn is_running(&self) -> bool {
        let mut inner = self.inner.lock().await;
        inner.refresh();
        inner.handle.is_some()
    }

    pub async fn status(&self) -> DatabaseStatus {
        let mut inner = self.inner.lock().await;
        inner.refresh();
        let handle = inner.handle.as_ref();
        DatabaseStatus {
            state: inner.state,
            pid: handle.map(|handle| handle.pid()),
            workspace: inner.workspace.clone(),
            started_at: handle.map(|handle| handle.started_at()),
            last_exit_code: inner.last_exit_code,
            recent_output: match handle {
                Some(handle) => handle.stderr_tail(),
                None => inner.last_stderr.clone(),
            },
        }
    }

    /// Executable `start` would use right now; touches no manager state
    pub fn resolve_path(&self) -> Option<PathBuf> {
        self.locator.locate(ServiceBinary::Mongod)
    }
}
