//! Executable discovery for managed services.
//!
//! Search order is fixed: the private install directory under the data
//! dir, then every `PATH` entry in order, then well-known per-platform
//! install locations. The first existing executable wins.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::platform::Platform;
use crate::version::Version;

/// Executables the gateway knows how to find
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceBinary {
    /// Database server
    Mongod,
    /// Interpreter hosting the notebook server
    Python,
}

impl ServiceBinary {
    pub fn service_name(&self) -> &'static str {
        match self {
            ServiceBinary::Mongod => "mongod",
            ServiceBinary::Python => "python",
        }
    }

    fn stems(&self, platform: Platform) -> &'static [&'static str] {
        match (self, platform) {
            (ServiceBinary::Mongod, _) => &["mongod"],
            (ServiceBinary::Python, Platform::Windows) => &["python"],
            (ServiceBinary::Python, _) => &["python3", "python"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct BinaryLocator {
    platform: Platform,
    data_dir: PathBuf,
    path_var: Option<OsString>,
    program_files: Option<PathBuf>,
    local_app_data: Option<PathBuf>,
    system_defaults: bool,
}

impl BinaryLocator {
    /// Locator reading `PATH` and Windows install roots from the process environment
    pub fn new(platform: Platform, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            data_dir: data_dir.into(),
            path_var: std::env::var_os("PATH"),
            program_files: std::env::var_os("ProgramFiles").map(PathBuf::from),
            local_app_data: std::env::var_os("LOCALAPPDATA").map(PathBuf::from),
            system_defaults: true,
        }
    }

    pub fn with_path_var(mut self, path_var: Option<OsString>) -> Self {
        self.path_var = path_var;
        self
    }

    pub fn with_program_files(mut self, program_files: Option<PathBuf>) -> Self {
        self.program_files = program_files;
        self
    }

    /// Toggle the well-known install locations at the end of the search
    pub fn with_system_defaults(mut self, enabled: bool) -> Self {
        self.system_defaults = enabled;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// First existing executable for `binary`, or `None`
    pub fn locate(&self, binary: ServiceBinary) -> Option<PathBuf> {
        let found = self
            .candidates(binary)
            .into_iter()
            .find(|candidate| is_executable(candidate));

        match &found {
            Some(path) => debug!(
                binary = binary.service_name(),
                path = %path.display(),
                "Located executable"
            ),
            None => debug!(binary = binary.service_name(), "Executable not found"),
        }

        found
    }

    /// Full ordered search list for `binary`
    pub fn candidates(&self, binary: ServiceBinary) -> Vec<PathBuf> {
        let mut candidates = self.private_candidates(binary);
        candidates.extend(self.path_candidates(binary));
        if self.system_defaults {
            candidates.extend(self.default_candidates(binary));
        }
        candidates
    }

    /// Where installers put their output inside the data dir
    pub fn private_candidates(&self, binary: ServiceBinary) -> Vec<PathBuf> {
        let exe = |stem: &str| self.platform.executable_name(stem);
        match (binary, self.platform) {
            (ServiceBinary::Mongod, _) => {
                vec![self.data_dir.join("mongodb").join("bin").join(exe("mongod"))]
            }
            (ServiceBinary::Python, Platform::Windows) => {
                vec![self.data_dir.join("python").join(exe("python"))]
            }
            (ServiceBinary::Python, _) => binary
                .stems(self.platform)
                .iter()
                .map(|stem| self.data_dir.join("python").join("bin").join(stem))
                .collect(),
        }
    }

    fn path_candidates(&self, binary: ServiceBinary) -> Vec<PathBuf> {
        let Some(path_var) = &self.path_var else {
            return Vec::new();
        };

        let mut candidates = Vec::new();
        for dir in std::env::split_paths(path_var) {
            if dir.as_os_str().is_empty() {
                continue;
            }
            for stem in binary.stems(self.platform) {
                candidates.push(dir.join(self.platform.executable_name(stem)));
            }
        }
        candidates
    }

    fn default_candidates(&self, binary: ServiceBinary) -> Vec<PathBuf> {
        match (binary, self.platform) {
            (ServiceBinary::Mongod, Platform::Windows) => {
                let Some(program_files) = &self.program_files else {
                    return Vec::new();
                };
                versioned_children(&program_files.join("MongoDB").join("Server"))
                    .into_iter()
                    .map(|dir| dir.join("bin").join("mongod.exe"))
                    .collect()
            }
            (ServiceBinary::Mongod, Platform::MacOS) => {
                let mut candidates = Vec::new();
                for prefix in ["/opt/homebrew", "/usr/local"] {
                    let cellar = Path::new(prefix).join("Cellar").join("mongodb-community");
                    candidates.extend(
                        versioned_children(&cellar)
                            .into_iter()
                            .map(|dir| dir.join("bin").join("mongod")),
                    );
                }
                candidates.push(PathBuf::from("/opt/homebrew/bin/mongod"));
                candidates.push(PathBuf::from("/usr/local/bin/mongod"));
                candidates
            }
            (ServiceBinary::Mongod, Platform::Linux) => vec![
                PathBuf::from("/usr/bin/mongod"),
                PathBuf::from("/usr/local/bin/mongod"),
            ],
            (ServiceBinary::Python, Platform::Windows) => {
                let mut candidates = Vec::new();
                if let Some(local) = &self.local_app_data {
                    candidates.extend(python_installs(&local.join("Programs").join("Python")));
                }
                if let Some(program_files) = &self.program_files {
                    candidates.extend(python_installs(program_files));
                }
                candidates
            }
            (ServiceBinary::Python, Platform::MacOS) => vec![
                PathBuf::from("/opt/homebrew/bin/python3"),
                PathBuf::from("/usr/local/bin/python3"),
                PathBuf::from("/usr/bin/python3"),
            ],
            (ServiceBinary::Python, Platform::Linux) => vec![
                PathBuf::from("/usr/bin/python3"),
                PathBuf::from("/usr/local/bin/python3"),
            ],
        }
    }
}

/// Existing regular file with an execute bit (any regular file on Windows)
pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Version-named subdirectories of `dir`, newest first
fn versioned_children(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let names: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();

    Version::newest_first(names)
        .into_iter()
        .map(|(_, name)| dir.join(name))
        .collect()
}

/// `Python312\python.exe`-style installs under `root`, newest first
fn python_installs(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };

    let mut installs: Vec<(u32, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let number = name.strip_prefix("Python")?.parse().ok()?;
            Some((number, entry.path().join("python.exe")))
        })
        .collect();
    installs.sort_by(|a, b| b.0.cmp(&a.0));
    installs.into_iter().map(|(_, path)| path).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn private_dir_comes_first_then_path() {
        let locator = BinaryLocator::new(Platform::Linux, "/data")
            .with_path_var(Some(OsString::from("/a:/b")))
            .with_system_defaults(false);

        assert_eq!(
            locator.candidates(ServiceBinary::Mongod),
            vec![
                PathBuf::from("/data/mongodb/bin/mongod"),
                PathBuf::from("/a/mongod"),
                PathBuf::from("/b/mongod"),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn python_prefers_python3_within_each_dir() {
        let locator = BinaryLocator::new(Platform::MacOS, "/data")
            .with_path_var(Some(OsString::from("/usr/bin")))
            .with_system_defaults(false);

        assert_eq!(
            locator.candidates(ServiceBinary::Python),
            vec![
                PathBuf::from("/data/python/bin/python3"),
                PathBuf::from("/data/python/bin/python"),
                PathBuf::from("/usr/bin/python3"),
                PathBuf::from("/usr/bin/python"),
            ]
        );
    }

    #[test]
    fn windows_server_versions_are_newest_first() {
        let program_files = TempDir::new().unwrap();
        for version in ["6.0", "7.0", "5.0"] {
            std::fs::create_dir_all(
                program_files
                    .path()
                    .join("MongoDB")
                    .join("Server")
                    .join(version),
            )
            .unwrap();
        }

        let locator = BinaryLocator::new(Platform::Windows, "/data")
            .with_path_var(None)
            .with_program_files(Some(program_files.path().to_path_buf()));

        let candidates = locator.candidates(ServiceBinary::Mongod);
        let server = program_files.path().join("MongoDB").join("Server");
        assert_eq!(
            &candidates[1..],
            &[
                server.join("7.0").join("bin").join("mongod.exe"),
                server.join("6.0").join("bin").join("mongod.exe"),
                server.join("5.0").join("bin").join("mongod.exe"),
            ]
        );
    }
}
