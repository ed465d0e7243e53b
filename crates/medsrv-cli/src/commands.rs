//! Supervisor subcommands.
//!
//! Each command returns a [`CommandReport`]; printing and exit codes are the
//! binary's job.

use std::time::Duration;

use medsrv_services::requirements::INSTALL_TIMEOUT;
use medsrv_services::{ProcessUtils, Version};
use medsrv_types::{RequirementSummary, SupervisorState};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::cli::SupervisorOptions;
use crate::client::{is_success, GatewayClient, DEFAULT_REQUEST_TIMEOUT};
use crate::error::SupervisorError;
use crate::handshake::ReadinessListener;
use crate::launcher::{log_tail, resolve_gateway_binary, GatewayLaunch};
use crate::state_store::StateStore;

const LOG_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct CommandReport {
    pub success: bool,
    pub body: Value,
    pub message: String,
}

impl CommandReport {
    fn new(success: bool, body: Value, message: impl Into<String>) -> Self {
        Self {
            success,
            body,
            message: message.into(),
        }
    }
}

pub async fn start(options: &SupervisorOptions, store: &StateStore) -> Result<CommandReport, SupervisorError> {
    if let Some(state) = store.running_gateway()? {
        return Err(SupervisorError::AlreadyRunning {
            pid: state.pid.unwrap_or_default(),
            port: state.gateway_port,
        });
    }

    let program = resolve_gateway_binary(options.gateway_bin.as_deref())?;
    let launch = GatewayLaunch::new(program, store.log_path()).production(options.production);
    let state = launch_and_wait(&launch, options.timeout, store).await?;

    Ok(CommandReport::new(
        true,
        json!({ "success": true, "state": state }),
        format!("Gateway ready at {}", state.gateway_url().unwrap_or_default()),
    ))
}

/// Spawn the gateway, wait for its readiness message and persist state.
///
/// State is written only after a successful handshake. On failure the child
/// is killed and the tail of its log is reported.
pub async fn launch_and_wait(
    launch: &GatewayLaunch,
    timeout: Duration,
    store: &StateStore,
) -> Result<SupervisorState, SupervisorError> {
    let listener = ReadinessListener::bind().await?;
    let mut child = launch.spawn(listener.addr())?;
    let pid = child.id().unwrap_or_default();

    match listener.wait(&mut child, timeout).await {
        Ok(port) => {
            let state = SupervisorState::running(pid, port);
            store.save(&state)?;
            info!(pid, port, "Gateway ready");
            Ok(state)
        }
        Err(e) => {
            if child.start_kill().is_ok() {
                let _ = child.wait().await;
            }
            error!(pid, error = %e, "Gateway failed to start");
            for line in log_tail(&launch.log_path, LOG_TAIL_LINES) {
                error!("  {line}");
            }
            Err(e)
        }
    }
}

pub async fn stop(store: &StateStore, grace: Duration) -> Result<CommandReport, SupervisorError> {
    let Some(state) = store.load() else {
        return Err(SupervisorError::NoState {
            path: store.path().to_path_buf(),
        });
    };

    let mut terminated = false;
    match state.pid {
        Some(pid) if ProcessUtils::is_process_running(pid) => {
            info!(pid, "Stopping gateway");
            ProcessUtils::terminate_pid(pid, grace).await?;
            terminated = true;
        }
        pid => warn!(pid = ?pid, "Recorded gateway is not running"),
    }
    store.clear()?;

    Ok(CommandReport::new(
        true,
        json!({ "success": true, "pid": state.pid, "terminated": terminated }),
        if terminated { "Gateway stopped" } else { "Gateway was not running; state cleared" },
    ))
}

pub async fn status(store: &StateStore) -> Result<CommandReport, SupervisorError> {
    let (state, client) = connect(store, DEFAULT_REQUEST_TIMEOUT)?;
    let status = client.get("/status").await?;
    let success = is_success(&status);

    let message = format!(
        "Gateway pid {} on {}{}",
        state.pid.map(|pid| pid.to_string()).unwrap_or_else(|| "?".into()),
        client.base_url(),
        if success { "" } else { " (status request failed)" },
    );
    Ok(CommandReport::new(
        success,
        json!({ "success": success, "state": state, "status": status }),
        message,
    ))
}

pub async fn ensure(options: &SupervisorOptions, store: &StateStore) -> Result<CommandReport, SupervisorError> {
    let (_, client) = connect(store, DEFAULT_REQUEST_TIMEOUT)?;
    let (go, mongo, jupyter) = options.ensure_targets();
    let body = json!({ "workspacePath": options.workspace });

    let (go_result, mongo_result, jupyter_result) = tokio::join!(
        request_if(go, client.post("/ensure-go", &body)),
        request_if(mongo, client.post("/start-mongo", &body)),
        request_if(jupyter, client.post("/start-jupyter-server", &body)),
    );

    let results: serde_json::Map<String, Value> = [
        ("go", go_result),
        ("mongo", mongo_result),
        ("jupyter", jupyter_result),
    ]
    .into_iter()
    .filter_map(|(name, result)| result.map(|value| (name.to_string(), value)))
    .collect();

    let failed: Vec<&str> = results
        .iter()
        .filter(|(_, value)| !is_success(value))
        .map(|(name, _)| name.as_str())
        .collect();
    let success = failed.is_empty();
    let message = if success {
        format!("Ensured: {}", results.keys().cloned().collect::<Vec<_>>().join(", "))
    } else {
        format!("Failed to ensure: {}", failed.join(", "))
    };

    Ok(CommandReport::new(
        success,
        json!({ "success": success, "results": results }),
        message,
    ))
}

async fn request_if<F>(enabled: bool, request: F) -> Option<Value>
where
    F: std::future::Future<Output = Result<Value, SupervisorError>>,
{
    if !enabled {
        return None;
    }
    Some(match request.await {
        Ok(value) => value,
        Err(e) => json!({ "success": false, "error": e.to_string() }),
    })
}

pub async fn install(options: &SupervisorOptions, store: &StateStore) -> Result<CommandReport, SupervisorError> {
    let state = match store.running_gateway()? {
        Some(state) => state,
        None => {
            info!("Gateway not running; starting it for install");
            let program = resolve_gateway_binary(options.gateway_bin.as_deref())?;
            let launch = GatewayLaunch::new(program, store.log_path()).production(options.production);
            launch_and_wait(&launch, options.timeout, store).await?
        }
    };
    let client = client_for(store, &state, INSTALL_TIMEOUT)?;
    install_missing(&client).await
}

/// Install whatever the gateway reports missing, then re-check.
pub async fn install_missing(client: &GatewayClient) -> Result<CommandReport, SupervisorError> {
    let before = requirements(client).await?;

    let mut steps = serde_json::Map::new();
    for report in before.missing() {
        let path = match report.service_name.as_str() {
            "mongod" => "/install-mongo",
            "jupyter" => "/install-notebook-package",
            other => {
                warn!(service = other, "No installer available");
                steps.insert(
                    other.to_string(),
                    json!({ "success": false, "error": format!("{other} must be installed manually") }),
                );
                continue;
            }
        };
        info!(service = %report.service_name, "Installing");
        let result = client.post(path, &json!({})).await?;
        steps.insert(report.service_name.clone(), result);
    }

    let python_met = match python_requirements_met(client).await {
        Some(false) => {
            info!("Installing required python packages");
            let result = client
                .post("/install-required-python-packages", &json!({}))
                .await?;
            steps.insert("python-packages".to_string(), result);
            python_requirements_met(client).await
        }
        checked => checked,
    };

    let after = requirements(client).await?;
    let mut missing: Vec<&str> = after.missing().map(|r| r.service_name.as_str()).collect();
    if python_met == Some(false) {
        missing.push("python packages");
    }
    let success = missing.is_empty();
    let message = if success {
        "All requirements present".to_string()
    } else {
        format!("Still missing: {}", missing.join(", "))
    };

    Ok(CommandReport::new(
        success,
        json!({
            "success": success,
            "before": before,
            "installs": steps,
            "after": after,
            "pythonRequirementsMet": python_met,
        }),
        message,
    ))
}

/// `None` when the gateway could not check, e.g. without a python runtime
async fn python_requirements_met(client: &GatewayClient) -> Option<bool> {
    match client.get("/check-python-requirements").await {
        Ok(body) if is_success(&body) => body.get("requirementsMet").and_then(Value::as_bool),
        Ok(body) => {
            debug!(error = ?body.get("error"), "Python requirements not checked");
            None
        }
        Err(e) => {
            warn!(error = %e, "Python requirements not checked");
            None
        }
    }
}

async fn requirements(client: &GatewayClient) -> Result<RequirementSummary, SupervisorError> {
    let body = client.get("/check-requirements").await?;
    if !is_success(&body) {
        return Err(SupervisorError::Gateway {
            path: "/check-requirements".into(),
            reason: body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    serde_json::from_value(body.get("result").cloned().unwrap_or(Value::Null)).map_err(|e| {
        SupervisorError::Gateway {
            path: "/check-requirements".into(),
            reason: format!("unexpected response: {e}"),
        }
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateManifest {
    pub version: String,
    #[serde(default)]
    pub url: Option<String>,
}

pub async fn upgrade(manifest_url: Option<&str>) -> Result<CommandReport, SupervisorError> {
    let url = manifest_url.ok_or_else(|| {
        SupervisorError::Upgrade("no update manifest configured; pass --manifest-url or set MEDSRV_UPDATE_MANIFEST".into())
    })?;

    let http = reqwest::Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| SupervisorError::Upgrade(e.to_string()))?;
    let manifest: UpdateManifest = http
        .get(url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| SupervisorError::Upgrade(e.to_string()))?
        .json()
        .await
        .map_err(|e| SupervisorError::Upgrade(format!("invalid manifest: {e}")))?;

    compare_versions(&Version::current(), &manifest)
}

pub fn compare_versions(current: &Version, manifest: &UpdateManifest) -> Result<CommandReport, SupervisorError> {
    let latest: Version = manifest
        .version
        .parse()
        .map_err(|e| SupervisorError::Upgrade(format!("invalid manifest version: {e}")))?;
    let available = latest > *current;

    let message = if available {
        match &manifest.url {
            Some(url) => format!("Update available: {current} -> {latest} ({url})"),
            None => format!("Update available: {current} -> {latest}"),
        }
    } else {
        format!("Up to date ({current})")
    };

    Ok(CommandReport::new(
        true,
        json!({
            "success": true,
            "currentVersion": current.to_string(),
            "latestVersion": latest.to_string(),
            "updateAvailable": available,
            "url": manifest.url,
        }),
        message,
    ))
}

fn connect(store: &StateStore, timeout: Duration) -> Result<(SupervisorState, GatewayClient), SupervisorError> {
    let state = store
        .running_gateway()?
        .ok_or_else(|| SupervisorError::NoState {
            path: store.path().to_path_buf(),
        })?;
    let client = client_for(store, &state, timeout)?;
    Ok((state, client))
}

fn client_for(store: &StateStore, state: &SupervisorState, timeout: Duration) -> Result<GatewayClient, SupervisorError> {
    let port = state.gateway_port.ok_or_else(|| SupervisorError::NoState {
        path: store.path().to_path_buf(),
    })?;
    GatewayClient::for_port(port, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0.1.0", false)]
    #[case("0.0.9", false)]
    #[case("0.2.0", true)]
    #[case("1.0", true)]
    fn upgrade_compares_against_current(#[case] latest: &str, #[case] available: bool) {
        let manifest = UpdateManifest {
            version: latest.into(),
            url: Some("https://example.invalid/medsrv".into()),
        };
        let report = compare_versions(&Version::new(0, 1, 0), &manifest).unwrap();
        assert!(report.success);
        assert_eq!(report.body["updateAvailable"], available);
        assert_eq!(report.body["currentVersion"], "0.1.0");
    }

    #[test]
    fn invalid_manifest_version_is_an_error() {
        let manifest = UpdateManifest {
            version: "latest".into(),
            url: None,
        };
        assert!(matches!(
            compare_versions(&Version::new(0, 1, 0), &manifest),
            Err(SupervisorError::Upgrade(_))
        ));
    }

    #[tokio::test]
    async fn upgrade_without_manifest_fails() {
        assert!(matches!(upgrade(None).await, Err(SupervisorError::Upgrade(_))));
    }
}
