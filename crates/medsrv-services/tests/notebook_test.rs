mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fake_python, Reply, ScriptedRunner};
use medsrv_services::notebook::{StopStrategy, REQUIRED_DIRECTIVES};
use medsrv_services::{
    allocate, BinaryLocator, NotebookManager, Platform, ServiceConfig, ServiceError,
    SystemProbeRunner,
};
use medsrv_types::PortRange;
use tempfile::TempDir;

fn config(python: Option<std::path::PathBuf>, port: u16) -> ServiceConfig {
    ServiceConfig {
        python,
        notebook_port: port,
        notebook_ready_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(2),
        ..ServiceConfig::default()
    }
}

fn manager(runner: Arc<dyn medsrv_services::ProbeRunner>, config: &ServiceConfig) -> NotebookManager {
    let locator = BinaryLocator::new(Platform::Linux, "/nonexistent-data-dir")
        .with_path_var(None)
        .with_system_defaults(false);
    NotebookManager::new(Arc::new(locator), runner, config)
}

#[tokio::test]
async fn missing_runtime_is_reported() {
    let runner = Arc::new(ScriptedRunner::new());
    let manager = manager(runner, &config(None, 8900));
    let workspace = TempDir::new().unwrap();

    let err = manager.start(workspace.path()).await.unwrap_err();
    assert!(matches!(err, ServiceError::RuntimeNotFound { .. }));
}

#[tokio::test]
async fn missing_package_is_reported() {
    let dir = TempDir::new().unwrap();
    let python = fake_python(dir.path());
    let runner = Arc::new(
        ScriptedRunner::new().on("--version", Reply::exit(1, "No module named jupyter")),
    );
    let manager = manager(runner, &config(Some(python.clone()), 8900));

    let err = manager.start(dir.path()).await.unwrap_err();
    match err {
        ServiceError::PackageNotInstalled { runtime, .. } => assert_eq!(runtime, python),
        other => panic!("expected PackageNotInstalled, got {other:?}"),
    }

    let report = manager.package_report().await;
    assert_eq!(report.service_name, "jupyter");
    assert!(report.resolved_path.is_none());
}

#[tokio::test]
async fn version_output_without_marker_is_not_installed() {
    let dir = TempDir::new().unwrap();
    let python = fake_python(dir.path());
    let runner = Arc::new(ScriptedRunner::new().on("--version", Reply::ok("Python 3.11.4\n")));
    let manager = manager(runner, &config(Some(python.clone()), 8900));

    assert!(manager.verify_package(&python).await.is_err());
}

#[tokio::test]
async fn ensure_config_creates_and_patches_once() {
    let dir = TempDir::new().unwrap();
    let python = fake_python(dir.path());
    let jupyter_dir = dir.path().join("home").join(".jupyter");
    let paths_output = format!(
        "config:\n    {}\n    /usr/etc/jupyter\ndata:\n    /usr/share/jupyter\n",
        jupyter_dir.display()
    );
    // --generate-config "succeeds" without writing anything
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("--paths", Reply::ok(&paths_output))
            .on("--generate-config", Reply::ok("")),
    );
    let manager = manager(runner.clone(), &config(Some(python.clone()), 8900));

    let path = manager.ensure_config(&python).await.unwrap();
    assert_eq!(path, jupyter_dir.join("jupyter_notebook_config.py"));
    let first = std::fs::read_to_string(&path).unwrap();
    for directive in REQUIRED_DIRECTIVES {
        assert_eq!(first.matches(directive).count(), 1);
    }

    manager.ensure_config(&python).await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), first);

    let generate_calls = runner
        .calls()
        .iter()
        .filter(|call| call.contains("--generate-config"))
        .count();
    assert_eq!(generate_calls, 1);
}

#[tokio::test]
async fn stop_falls_back_to_subcommand() {
    let dir = TempDir::new().unwrap();
    let python = fake_python(dir.path());
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("lsof", Reply::exit(1, ""))
            .on("notebook stop 8900", Reply::ok("Shutting down server on 8900...")),
    );
    let manager = manager(runner.clone(), &config(Some(python), 8900));

    let report = manager.stop().await.unwrap();
    assert_eq!(report.stopped_by, Some(StopStrategy::StopSubcommand));
    assert_eq!(report.attempts.len(), 2);
    assert!(!report.attempts[0].succeeded);

    let calls = runner.calls();
    assert!(calls[0].starts_with("lsof"));
    assert!(calls[1].ends_with("-m jupyter notebook stop 8900"));
}

#[tokio::test]
async fn stop_kills_listener_by_port() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("lsof", Reply::ok("4242\n"))
            .on("kill 4242", Reply::ok("")),
    );
    let manager = manager(runner.clone(), &config(None, 8900));

    let report = manager.stop().await.unwrap();
    assert_eq!(report.stopped_by, Some(StopStrategy::KillByPort));
    assert_eq!(runner.calls(), vec!["lsof -t -itcp:8900 -sTCP:LISTEN", "kill 4242"]);
}

#[tokio::test]
async fn stop_fails_only_when_every_strategy_fails() {
    let dir = TempDir::new().unwrap();
    let python = fake_python(dir.path());
    // Something holds the port, but neither strategy can reach it
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("lsof", Reply::Fail(std::io::ErrorKind::NotFound))
            .on("notebook stop", Reply::exit(1, "There is no running server on that port")),
    );
    let manager = manager(runner.clone(), &config(Some(python), port));

    let err = manager.stop().await.unwrap_err();
    match err {
        ServiceError::ProcessKillFailed { service, reason } => {
            assert_eq!(service, "jupyter");
            assert!(reason.contains("no running server"));
        }
        other => panic!("expected ProcessKillFailed, got {other:?}"),
    }
    assert_eq!(runner.calls().len(), 2);
    drop(listener);
}

#[tokio::test]
async fn stop_without_a_server_reports_nothing_running() {
    let dir = TempDir::new().unwrap();
    let python = fake_python(dir.path());
    let port = allocate(&PortRange::new(20000, 40000).unwrap()).unwrap();
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("lsof", Reply::exit(1, ""))
            .on("notebook stop", Reply::exit(1, "There is no running server on that port")),
    );
    let manager = manager(runner.clone(), &config(Some(python), port));

    let report = manager.stop().await.unwrap();
    assert_eq!(report.stopped_by, None);
    assert!(!report.was_running());
    assert_eq!(report.attempts.len(), 2);
    assert!(report.attempts.iter().all(|attempt| !attempt.succeeded));
}

#[tokio::test]
async fn missing_python_packages_come_from_pip_list() {
    let dir = TempDir::new().unwrap();
    let python = fake_python(dir.path());
    let listing = r#"[{"name": "jupyter_core", "version": "5.7.2"}, {"name": "pymongo", "version": "4.8.0"}]"#;
    let runner = Arc::new(ScriptedRunner::new().on("pip list", Reply::ok(listing)));
    let manager = manager(runner.clone(), &config(Some(python.clone()), 8900));

    let installed = manager.installed_packages(&python).await.unwrap();
    assert_eq!(installed.len(), 2);
    assert_eq!(installed[0].name, "jupyter_core");

    let missing = manager.missing_python_packages(&python).await.unwrap();
    assert_eq!(missing, vec!["notebook".to_string()]);
    assert!(runner.calls()[0].contains("-m pip list --format=json"));
}

#[tokio::test]
async fn pip_failures_are_reported() {
    let dir = TempDir::new().unwrap();
    let python = fake_python(dir.path());

    let no_pip = manager(
        Arc::new(ScriptedRunner::new().on("pip list", Reply::exit(1, "No module named pip"))),
        &config(Some(python.clone()), 8900),
    );
    match no_pip.installed_packages(&python).await.unwrap_err() {
        ServiceError::PackageNotInstalled { package, .. } => assert_eq!(package, "pip"),
        other => panic!("expected PackageNotInstalled, got {other:?}"),
    }

    let garbled = manager(
        Arc::new(ScriptedRunner::new().on("pip list", Reply::ok("Package    Version\n-------    -------\n"))),
        &config(Some(python.clone()), 8900),
    );
    assert!(matches!(
        garbled.installed_packages(&python).await.unwrap_err(),
        ServiceError::UnexpectedOutput { .. }
    ));
}

#[tokio::test]
async fn requested_runtime_must_exist() {
    let dir = TempDir::new().unwrap();
    let python = fake_python(dir.path());
    let manager = manager(Arc::new(ScriptedRunner::new()), &config(None, 8900));

    assert_eq!(manager.runtime_for(Some(&python)).unwrap(), python);
    assert!(matches!(
        manager.runtime_for(Some(&dir.path().join("missing"))).unwrap_err(),
        ServiceError::RuntimeNotFound { .. }
    ));
    // Nothing configured and nothing on the search path
    assert!(manager.runtime_for(None).is_err());
}

#[tokio::test]
async fn status_reads_notebook_listing() {
    let dir = TempDir::new().unwrap();
    let python = fake_python(dir.path());

    let listing = "Currently running servers:\nhttp://localhost:8900/ :: /ws/DATA\n";
    let running = manager(
        Arc::new(ScriptedRunner::new().on("notebook list", Reply::ok(listing))),
        &config(Some(python.clone()), 8900),
    );
    assert!(running.status().await.running);

    let other_port = manager(
        Arc::new(ScriptedRunner::new().on("notebook list", Reply::ok(listing))),
        &config(Some(python.clone()), 8901),
    );
    assert!(!other_port.status().await.running);

    let broken = manager(
        Arc::new(ScriptedRunner::new().on("notebook list", Reply::Fail(std::io::ErrorKind::TimedOut))),
        &config(Some(python), 8900),
    );
    let status = broken.status().await;
    assert!(!status.running);
    assert!(status.error.is_some());
}

#[cfg(unix)]
mod spawned {
    use super::*;
    use common::write_script;
    use medsrv_services::ProcessUtils;

    /// Fake interpreter answering the jupyter probes; `serve` runs for `notebook <flags>`
    fn fake_jupyter(dir: &std::path::Path, serve: &str) -> std::path::PathBuf {
        let jupyter_dir = dir.join(".jupyter");
        write_script(
            &dir.join("bin"),
            "python3",
            &format!(
                r#"case "$3" in
  --version) echo "jupyter core     : 5.7.2" ;;
  --paths) echo "config:"; echo "    {jupyter}" ;;
  notebook)
    case "$4" in
      --generate-config) mkdir -p "{jupyter}"; touch "{jupyter}/jupyter_notebook_config.py" ;;
      *) {serve} ;;
    esac ;;
esac"#,
                jupyter = jupyter_dir.display(),
            ),
        )
    }

    fn free_port() -> u16 {
        allocate(&PortRange::new(20000, 40000).unwrap()).unwrap()
    }

    fn spawning_manager(python: std::path::PathBuf, port: u16, ready: Duration) -> NotebookManager {
        let config = ServiceConfig {
            notebook_ready_timeout: ready,
            ..config(Some(python), port)
        };
        manager(Arc::new(SystemProbeRunner::new(Duration::from_secs(5))), &config)
    }

    #[tokio::test]
    async fn start_waits_for_port_announcement() {
        let dir = TempDir::new().unwrap();
        let port = free_port();
        let python = fake_jupyter(
            dir.path(),
            &format!("echo \"Serving at http://localhost:{port}/tree\" >&2; exec sleep 30"),
        );
        let manager = spawning_manager(python, port, Duration::from_secs(5));

        let started = manager.start(dir.path()).await.unwrap();
        assert!(started.spawned);
        assert_eq!(started.port, port);
        assert!(dir.path().join("DATA").is_dir());
        assert!(manager.owns_running_process().await);

        let again = manager.start(dir.path()).await.unwrap();
        assert!(!again.spawned);
        assert_eq!(again.pid, started.pid);

        manager.shutdown().await;
        assert!(!ProcessUtils::is_process_running(started.pid));
    }

    #[tokio::test]
    async fn longer_port_number_is_not_an_announcement() {
        let dir = TempDir::new().unwrap();
        let port = free_port();
        let python = fake_jupyter(
            dir.path(),
            &format!("echo \"proxy listening on 1{port}\" >&2; exec sleep 30"),
        );
        let manager = spawning_manager(python, port, Duration::from_millis(700));

        match manager.start(dir.path()).await.unwrap_err() {
            ServiceError::ReadinessTimeout { stderr, .. } => {
                assert_eq!(stderr, vec![format!("proxy listening on 1{port}")]);
            }
            other => panic!("expected ReadinessTimeout, got {other:?}"),
        }
        assert!(!manager.owns_running_process().await);
    }

    #[tokio::test]
    async fn crashing_server_reports_exit() {
        let dir = TempDir::new().unwrap();
        let port = free_port();
        let python = fake_jupyter(dir.path(), "echo boom >&2; exit 2");
        let manager = spawning_manager(python, port, Duration::from_secs(5));

        let err = manager.start(dir.path()).await.unwrap_err();
        assert!(err.to_string().ends_with("stderr: boom"));
        match err {
            ServiceError::ExitedEarly { code, stderr, .. } => {
                assert_eq!(code, Some(2));
                assert_eq!(stderr, vec!["boom".to_string()]);
            }
            other => panic!("expected ExitedEarly, got {other:?}"),
        }
    }
}
