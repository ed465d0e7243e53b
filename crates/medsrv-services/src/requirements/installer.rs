//! Platform-specific MongoDB installation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tar::Archive;
use tracing::{info, warn};

use crate::error::ServiceError;
use crate::platform::{Architecture, Platform};
use crate::process::{ProbeCommand, ProbeRunner};

const SERVICE: &str = "mongod";

pub const WINDOWS_MSI_URL: &str =
    "https://fastdl.mongodb.org/windows/mongodb-windows-x86_64-7.0.12-signed.msi";
pub const HOMEBREW_FORMULA: &str = "mongodb-community@7.0";
pub const LINUX_VERSION: &str = "7.0.15";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStrategy {
    /// Download the signed MSI and run it unattended
    WindowsMsi { url: String },
    /// `brew tap mongodb/brew && brew install <formula>`
    Homebrew { formula: String },
    /// Download a release tarball and unpack it into the data dir
    LinuxTarball { url: String, archive_root: String },
}

impl InstallStrategy {
    /// Pick the strategy for a host; `os_release` is the content of `/etc/os-release` on Linux
    pub fn for_host(
        platform: Platform,
        arch: Architecture,
        os_release: Option<&str>,
    ) -> Result<Self, ServiceError> {
        match platform {
            Platform::Windows => Ok(InstallStrategy::WindowsMsi {
                url: WINDOWS_MSI_URL.to_string(),
            }),
            Platform::MacOS => Ok(InstallStrategy::Homebrew {
                formula: HOMEBREW_FORMULA.to_string(),
            }),
            Platform::Linux => {
                let release = parse_os_release(os_release.unwrap_or_default());
                let tag = linux_build_tag(&release, arch).ok_or_else(|| {
                    ServiceError::UnsupportedPlatform(format!(
                        "no MongoDB build for {} {} on {arch}",
                        release.id, release.version_id
                    ))
                })?;
                let archive_root = format!("mongodb-linux-{arch}-{tag}-{LINUX_VERSION}");
                Ok(InstallStrategy::LinuxTarball {
                    url: format!("https://fastdl.mongodb.org/linux/{archive_root}.tgz"),
                    archive_root,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub version_id: String,
}

pub fn parse_os_release(content: &str) -> OsRelease {
    let mut release = OsRelease::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "ID" => release.id = value.to_ascii_lowercase(),
            "VERSION_ID" => release.version_id = value,
            _ => {}
        }
    }
    release
}

fn linux_build_tag(release: &OsRelease, arch: Architecture) -> Option<&'static str> {
    match (release.id.as_str(), release.version_id.as_str(), arch) {
        ("ubuntu", "20.04", _) => Some("ubuntu2004"),
        ("ubuntu", "22.04", _) => Some("ubuntu2204"),
        ("debian", "10", Architecture::X86_64) => Some("debian10"),
        ("debian", "11", Architecture::X86_64) => Some("debian11"),
        _ => None,
    }
}

/// Compare a SHA-256 digest of `bytes` with `expected` (hex, any case)
pub fn verify_checksum(bytes: &[u8], expected: &str) -> Result<(), ServiceError> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let actual = format!("{:x}", hasher.finalize());

    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(ServiceError::install_failed(
            SERVICE,
            format!("checksum mismatch: expected {expected}, got {actual}"),
        ))
    }
}

/// Unpack a `.tgz` into `data_dir` and rename its top folder to `mongodb`
pub fn unpack_tarball(
    bytes: &[u8],
    data_dir: &Path,
    archive_root: &str,
) -> Result<PathBuf, ServiceError> {
    std::fs::create_dir_all(data_dir)?;
    let mut archive = Archive::new(GzDecoder::new(bytes));
    archive
        .unpack(data_dir)
        .map_err(|e| ServiceError::install_failed(SERVICE, format!("failed to extract archive: {e}")))?;

    let unpacked = data_dir.join(archive_root);
    if !unpacked.is_dir() {
        return Err(ServiceError::install_failed(
            SERVICE,
            format!("archive did not contain {archive_root}/"),
        ));
    }

    let target = data_dir.join("mongodb");
    if target.exists() {
        std::fs::remove_dir_all(&target)?;
    }
    std::fs::rename(&unpacked, &target)?;
    Ok(target)
}

pub struct MongoInstaller {
    client: reqwest::Client,
    runner: Arc<dyn ProbeRunner>,
    data_dir: PathBuf,
    downloads_dir: PathBuf,
    platform: Platform,
}

impl MongoInstaller {
    pub fn new(
        runner: Arc<dyn ProbeRunner>,
        platform: Platform,
        data_dir: PathBuf,
        downloads_dir: PathBuf,
    ) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("medsrv/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            client,
            runner,
            data_dir,
            downloads_dir,
            platform,
        }
    }

    /// Install MongoDB the way this host supports
    pub async fn install(&self) -> Result<(), ServiceError> {
        let os_release = match self.platform {
            Platform::Linux => std::fs::read_to_string("/etc/os-release").ok(),
            _ => None,
        };
        let strategy =
            InstallStrategy::for_host(self.platform, Architecture::current()?, os_release.as_deref())?;
        self.install_with(&strategy).await
    }

    pub async fn install_with(&self, strategy: &InstallStrategy) -> Result<(), ServiceError> {
        info!(?strategy, "Installing MongoDB");
        match strategy {
            InstallStrategy::WindowsMsi { url } => {
                let bytes = self.download_verified(url).await?;
                std::fs::create_dir_all(&self.downloads_dir)?;
                let file_name = url.rsplit('/').next().unwrap_or("mongodb.msi");
                let msi = self.downloads_dir.join(file_name);
                std::fs::write(&msi, &bytes)?;

                let command = ProbeCommand::new("msiexec.exe").args([
                    "/l*v".to_string(),
                    "mdbinstall.log".to_string(),
                    "/qb".to_string(),
                    "/i".to_string(),
                    msi.display().to_string(),
                    "ADDLOCAL=ServerNoService".to_string(),
                    "SHOULD_INSTALL_COMPASS=0".to_string(),
                ]);
                let result = self.run_checked(&command).await;
                if let Err(e) = std::fs::remove_file(&msi) {
                    warn!(path = %msi.display(), error = %e, "Failed to remove installer");
                }
                result
            }
            InstallStrategy::Homebrew { formula } => {
                self.run_checked(&ProbeCommand::new("brew").args(["tap", "mongodb/brew"]))
                    .await?;
                self.run_checked(&ProbeCommand::new("brew").args(["install", formula.as_str()]))
                    .await
            }
            InstallStrategy::LinuxTarball { url, archive_root } => {
                let bytes = self.download_verified(url).await?;
                let data_dir = self.data_dir.clone();
                let archive_root = archive_root.clone();
                let target = tokio::task::spawn_blocking(move || {
                    unpack_tarball(&bytes, &data_dir, &archive_root)
                })
                .await
                .map_err(|e| ServiceError::install_failed(SERVICE, e))??;
                info!(path = %target.display(), "MongoDB unpacked");
                Ok(())
            }
        }
    }

    async fn run_checked(&self, command: &ProbeCommand) -> Result<(), ServiceError> {
        let output = self
            .runner
            .run(command)
            .await
            .map_err(|e| ServiceError::install_failed(SERVICE, format!("'{command}' failed: {e}")))?;
        if output.success() {
            Ok(())
        } else {
            Err(ServiceError::install_failed(
                SERVICE,
                format!("'{command}' exited with {:?}: {}", output.code, output.stderr.trim()),
            ))
        }
    }

    async fn download_verified(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        info!(url, "Downloading");
        let bytes = self.fetch(url).await?;

        match self.published_checksum(url).await {
            Some(expected) => {
                verify_checksum(&bytes, &expected)?;
                info!(url, "Checksum verified");
            }
            None => warn!(url, "No published checksum, skipping verification"),
        }
        Ok(bytes)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ServiceError::install_failed(SERVICE, format!("download of {url} failed: {e}")))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ServiceError::install_failed(SERVICE, format!("download of {url} failed: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Digest from `<url>.sha256` (`<hex>  <file>`), if published
    async fn published_checksum(&self, url: &str) -> Option<String> {
        let bytes = self.fetch(&format!("{url}.sha256")).await.ok()?;
        let text = String::from_utf8(bytes).ok()?;
        text.split_whitespace()
            .next()
            .filter(|digest| digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()))
            .map(str::to_string)
    }
}
