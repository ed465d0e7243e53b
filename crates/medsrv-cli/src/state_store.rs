//! Persisted supervisor state.
//!
//! Writes go through a temp file in the same directory followed by a rename,
//! so a reader sees either the previous file or the new one. A file that is
//! missing or fails to parse reads as "no state".

use std::io::Write;
use std::path::{Path, PathBuf};

use medsrv_services::ProcessUtils;
use medsrv_types::SupervisorState;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const DEFAULT_STATE_FILE: &str = "medomics-server-state.json";
const CHILD_LOG_FILE: &str = "server-child.log";

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Gateway output log, kept beside the state file
    pub fn log_path(&self) -> PathBuf {
        self.path.with_file_name(CHILD_LOG_FILE)
    }

    pub fn load(&self) -> Option<SupervisorState> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "No readable state file");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unparsable state file");
                None
            }
        }
    }

    pub fn save(&self, state: &SupervisorState) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut file = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut file, state)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn clear(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// State of a gateway that is actually alive.
    ///
    /// A record claiming a running gateway whose pid is gone is stale: it is
    /// removed and `None` is returned.
    pub fn running_gateway(&self) -> std::io::Result<Option<SupervisorState>> {
        let Some(state) = self.load() else {
            return Ok(None);
        };
        if !state.running {
            return Ok(None);
        }

        match state.pid {
            Some(pid) if ProcessUtils::is_process_running(pid) => Ok(Some(state)),
            pid => {
                warn!(pid = ?pid, path = %self.path.display(), "Removing stale state file");
                self.clear()?;
                Ok(None)
            }
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        assert!(store.load().is_none());

        let state = SupervisorState::running(std::process::id(), 3001);
        store.save(&state).unwrap();
        assert_eq!(store.load(), Some(state.clone()));
        assert_eq!(store.running_gateway().unwrap(), Some(state));
        assert_eq!(store.log_path(), dir.path().join("server-child.log"));
    }

    #[test]
    fn torn_file_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        std::fs::write(store.path(), "{\"running\": tr").unwrap();
        assert!(store.load().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn stale_state_is_removed() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();

        store
            .save(&SupervisorState::running(dead_pid, 3001))
            .unwrap();
        assert_eq!(store.running_gateway().unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn clearing_twice_is_fine() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        store.clear().unwrap();
        store.clear().unwrap();
    }
}
