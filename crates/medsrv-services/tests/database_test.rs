#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use medsrv_services::database::config_path;
use medsrv_services::{BinaryLocator, DatabaseManager, Platform, ProcessUtils, ServiceError};
use medsrv_types::DatabaseState;
use tempfile::TempDir;

/// Install a fake `mongod` into the private dir of `data_dir`
fn install_fake_mongod(data_dir: &Path, body: &str) -> PathBuf {
    let bin_dir = data_dir.join("mongodb").join("bin");
    fs::create_dir_all(&bin_dir).unwrap();
    let path = bin_dir.join("mongod");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn workspace_with_config() -> TempDir {
    let workspace = TempDir::new().unwrap();
    let config = config_path(workspace.path());
    fs::create_dir_all(config.parent().unwrap()).unwrap();
    fs::write(&config, "net:\n  port: 54017\n").unwrap();
    workspace
}

fn manager(data_dir: &Path) -> DatabaseManager {
    let locator = BinaryLocator::new(Platform::Linux, data_dir)
        .with_path_var(None)
        .with_system_defaults(false);
    DatabaseManager::new(Arc::new(locator), Duration::from_secs(2))
}

#[tokio::test]
async fn missing_config_is_reported_before_spawning() {
    let data = TempDir::new().unwrap();
    install_fake_mongod(data.path(), "exec sleep 30");
    let workspace = TempDir::new().unwrap();

    let err = manager(data.path())
        .start(workspace.path())
        .await
        .unwrap_err();

    match err {
        ServiceError::ConfigMissing { path } => assert_eq!(path, config_path(workspace.path())),
        other => panic!("expected ConfigMissing, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_binary_is_reported() {
    let data = TempDir::new().unwrap();
    let workspace = workspace_with_config();

    let manager = manager(data.path());
    assert!(manager.resolve_path().is_none());
    let err = manager.start(workspace.path()).await.unwrap_err();
    assert!(matches!(err, ServiceError::BinaryNotFound { .. }));
    assert_eq!(manager.status().await.state, DatabaseState::Stopped);
}

#[tokio::test]
async fn start_passes_config_and_stop_kills() {
    let data = TempDir::new().unwrap();
    let args_file = data.path().join("args.txt");
    install_fake_mongod(
        data.path(),
        &format!("echo \"$@\" > {}\nexec sleep 30", args_file.display()),
    );
    let workspace = workspace_with_config();
    let manager = manager(data.path());

    let started = manager.start(workspace.path()).await.unwrap();
    assert_eq!(started.config_path, config_path(workspace.path()));
    assert!(manager.is_running().await);

    let status = manager.status().await;
    assert_eq!(status.state, DatabaseState::Running);
    assert_eq!(status.pid, Some(started.pid));
    assert!(status.started_at.is_some());

    // Give the script a moment to record its arguments
    tokio::time::sleep(Duration::from_millis(200)).await;
    let args = fs::read_to_string(&args_file).unwrap();
    assert_eq!(
        args.trim(),
        format!("--config {}", config_path(workspace.path()).display())
    );

    assert_eq!(manager.stop().await.unwrap(), Some(started.pid));
    assert!(!manager.is_running().await);
    assert!(!ProcessUtils::is_process_running(started.pid));
    assert_eq!(manager.stop().await.unwrap(), None);
}

#[tokio::test]
async fn overlapping_starts_leave_one_process() {
    let data = TempDir::new().unwrap();
    install_fake_mongod(data.path(), "exec sleep 30");
    let workspace = workspace_with_config();
    let manager = manager(data.path());

    let (first, second) = tokio::join!(
        manager.start(workspace.path()),
        manager.start(workspace.path())
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_ne!(first.pid, second.pid);

    let live = manager.status().await.pid.unwrap();
    let replaced = if live == first.pid { second.pid } else { first.pid };
    assert!(ProcessUtils::is_process_running(live));
    assert!(!ProcessUtils::is_process_running(replaced));

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn crashed_process_is_observed() {
    let data = TempDir::new().unwrap();
    install_fake_mongod(
        data.path(),
        "echo 'Address already in use' >&2\necho 'exiting with code 48' >&2\nexit 48",
    );
    let workspace = workspace_with_config();
    let manager = manager(data.path());

    manager.start(workspace.path()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(!manager.is_running().await);
    let status = manager.status().await;
    assert_eq!(status.state, DatabaseState::Stopped);
    assert_eq!(status.last_exit_code, Some(48));
    assert!(status.pid.is_none());
    assert!(status.started_at.is_none());
    assert_eq!(
        status.recent_output,
        vec!["Address already in use".to_string(), "exiting with code 48".to_string()]
    );
}
