//! Workspace layout: path normalization, provisioning and directory listings.

use std::path::{Path, PathBuf};

use medsrv_types::{DirectoryNode, NodeKind};
use serde::Serialize;
use tracing::{debug, info};

use crate::database::config_path;
use crate::error::ServiceError;
use crate::platform::Platform;

/// Folders every workspace carries
pub const WORKSPACE_FOLDERS: [&str; 2] = ["DATA", "EXPERIMENTS"];

/// Rewrite a client-supplied path into the host's native form.
///
/// Backslashes become forward slashes; on Windows the result is converted
/// back to backslashes and a leading separator before a drive letter
/// (`/C:/Users/...` as sent by URL-minded clients) is dropped.
pub fn normalize_path_for_platform(path: &str, platform: Platform) -> String {
    let forward = path.replace('\\', "/");
    if !platform.is_windows() {
        return forward;
    }

    let native = forward.replace('/', "\\");
    let bytes = native.as_bytes();
    if bytes.len() >= 3 && bytes[0] == b'\\' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':' {
        native[1..].to_string()
    } else {
        native
    }
}

/// Validate and normalize a requested workspace path
pub fn resolve_workspace_path(
    requested: Option<&str>,
    platform: Platform,
) -> Result<PathBuf, ServiceError> {
    let requested = requested.map(str::trim).unwrap_or_default();
    if requested.is_empty() {
        return Err(ServiceError::PathInvalid {
            message: "no path provided".to_string(),
        });
    }
    if requested.contains('\0') {
        return Err(ServiceError::PathInvalid {
            message: "path contains a NUL byte".to_string(),
        });
    }
    Ok(PathBuf::from(normalize_path_for_platform(requested, platform)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MongodConfig {
    system_log: SystemLog,
    storage: Storage,
    net: Net,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SystemLog {
    destination: &'static str,
    path: String,
    log_append: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Storage {
    db_path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Net {
    bind_ip: &'static str,
    port: u16,
}

/// Render the default `mongod.conf` for `workspace`
pub fn render_mongod_config(workspace: &Path, port: u16) -> Result<String, ServiceError> {
    let private = workspace.join(".medomics");
    let config = MongodConfig {
        system_log: SystemLog {
            destination: "file",
            path: private.join("mongod.log").display().to_string(),
            log_append: true,
        },
        storage: Storage {
            db_path: private.join("MongoDBdata").display().to_string(),
        },
        net: Net {
            bind_ip: "localhost",
            port,
        },
    };
    serde_yaml::to_string(&config).map_err(|e| ServiceError::PathInvalid {
        message: format!("cannot render mongod config: {e}"),
    })
}

/// Create the workspace folders and, if absent, its `mongod.conf`.
///
/// Existing files are never overwritten. Returns the config path.
pub fn provision(workspace: &Path, mongo_port: u16) -> Result<PathBuf, ServiceError> {
    for folder in WORKSPACE_FOLDERS {
        std::fs::create_dir_all(workspace.join(folder))?;
    }
    std::fs::create_dir_all(workspace.join(".medomics").join("MongoDBdata"))?;

    let config = config_path(workspace);
    if config.exists() {
        debug!(path = %config.display(), "Keeping existing mongod config");
    } else {
        std::fs::write(&config, render_mongod_config(workspace, mongo_port)?)?;
        info!(path = %config.display(), port = mongo_port, "Wrote mongod config");
    }
    Ok(config)
}

/// Listing of `root` down to `max_depth` levels; `None` if `root` does not exist.
///
/// Children are sorted by name and unreadable entries are skipped.
pub fn directory_tree(root: &Path, max_depth: usize) -> Option<DirectoryNode> {
    let metadata = std::fs::metadata(root).ok()?;
    Some(build_node(root, &metadata, max_depth))
}

fn build_node(path: &Path, metadata: &std::fs::Metadata, depth: usize) -> DirectoryNode {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    if !metadata.is_dir() {
        return DirectoryNode {
            name,
            path: path.to_path_buf(),
            kind: NodeKind::File,
            size: Some(metadata.len()),
            children: None,
        };
    }

    let children = if depth == 0 {
        None
    } else {
        let mut entries: Vec<(PathBuf, std::fs::Metadata)> = std::fs::read_dir(path)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| {
                        let path = entry.path();
                        std::fs::metadata(&path).ok().map(|meta| (path, meta))
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
        Some(
            entries
                .iter()
                .map(|(child, meta)| build_node(child, meta, depth - 1))
                .collect(),
        )
    };

    DirectoryNode {
        name,
        path: path.to_path_buf(),
        kind: NodeKind::Directory,
        size: None,
        children,
    }
}
