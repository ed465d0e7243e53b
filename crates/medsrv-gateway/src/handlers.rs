//! HTTP handlers for the gateway control surface

use std::path::{Path, PathBuf};

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::response::Json;
use medsrv_services::workspace::{directory_tree, provision, resolve_workspace_path};
use medsrv_types::{Envelope, GatewayStatus, PythonPathRequest, TreeQuery, WorkspaceRequest};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::GatewayError;
use crate::state::ApiState;

type ApiResult = Result<Json<Value>, GatewayError>;

/// Wrap `body` in a success envelope
fn ok<T: Serialize>(body: T) -> ApiResult {
    serde_json::to_value(Envelope::ok(body))
        .map(Json)
        .map_err(|e| GatewayError::Internal(format!("Failed to encode response: {e}")))
}

/// Body is optional for most POST routes; only a malformed body is an error
fn workspace_body(body: Result<Json<WorkspaceRequest>, JsonRejection>) -> Result<WorkspaceRequest, GatewayError> {
    match body {
        Ok(Json(request)) => Ok(request),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(WorkspaceRequest::default()),
        Err(e) => Err(GatewayError::BadRequest(format!("Invalid request body: {e}"))),
    }
}

/// Requested workspace, else the current working directory
async fn target_workspace(state: &ApiState, requested: Option<&str>) -> Result<PathBuf, GatewayError> {
    match requested {
        Some(path) => Ok(resolve_workspace_path(Some(path), state.platform)?),
        None => state.working_dir().await.ok_or_else(|| {
            GatewayError::BadRequest("No workspace path provided and no working directory set".to_string())
        }),
    }
}

/// POST /set-working-directory
pub async fn set_working_directory(
    State(state): State<ApiState>,
    body: Result<Json<WorkspaceRequest>, JsonRejection>,
) -> ApiResult {
    let request = workspace_body(body)?;
    let workspace = resolve_workspace_path(request.workspace_path.as_deref(), state.platform)
        .map_err(|e| GatewayError::BadRequest(format!("Invalid request body ({e})")))?;

    provision(&workspace, state.services.mongo_port)?;
    *state.working_dir.write().await = Some(workspace.clone());
    info!(workspace = %workspace.display(), "Working directory set");

    let database = match state.database.start(&workspace).await {
        Ok(started) => json!({ "running": true, "pid": started.pid }),
        Err(e) => {
            warn!(error = %e, "Database did not start for new working directory");
            json!({ "running": false, "error": e.to_string() })
        }
    };

    ok(json!({
        "workingDirectory": directory_tree(&workspace, state.tree_depth),
        "hasBeenSet": true,
        "isRemote": false,
        "database": database,
    }))
}

/// GET /get-working-dir-tree
pub async fn get_working_dir_tree(
    State(state): State<ApiState>,
    query: Result<Query<TreeQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query.map_err(|e| GatewayError::BadRequest(e.to_string()))?;
    let root = target_workspace(&state, query.requested_path.as_deref()).await?;

    let tree = directory_tree(&root, state.tree_depth)
        .ok_or_else(|| GatewayError::NotFound(format!("{} does not exist", root.display())))?;
    ok(json!({ "workingDirectory": tree }))
}

/// POST /start-mongo
pub async fn start_mongo(
    State(state): State<ApiState>,
    body: Result<Json<WorkspaceRequest>, JsonRejection>,
) -> ApiResult {
    let request = workspace_body(body)?;
    let workspace = target_workspace(&state, request.workspace_path.as_deref()).await?;

    let started = state.database.start(&workspace).await?;
    ok(json!({
        "running": true,
        "pid": started.pid,
        "binary": started.binary,
        "configPath": started.config_path,
    }))
}

/// POST /stop-mongo
pub async fn stop_mongo(State(state): State<ApiState>) -> ApiResult {
    let pid = state.database.stop().await?;
    ok(json!({ "stopped": pid.is_some(), "pid": pid }))
}

/// GET /get-mongo-path
pub async fn get_mongo_path(State(state): State<ApiState>) -> ApiResult {
    match state.database.resolve_path() {
        Some(path) => ok(json!({ "path": path })),
        None => Err(GatewayError::NotFound("mongod executable not found".to_string())),
    }
}

/// GET /check-jupyter-status
pub async fn check_jupyter_status(State(state): State<ApiState>) -> ApiResult {
    ok(state.notebook.status().await)
}

/// POST /start-jupyter-server
pub async fn start_jupyter_server(
    State(state): State<ApiState>,
    body: Result<Json<WorkspaceRequest>, JsonRejection>,
) -> ApiResult {
    let request = workspace_body(body)?;
    let workspace = target_workspace(&state, request.workspace_path.as_deref()).await?;

    let started = state
        .notebook
        .start(&workspace)
        .await
        .map_err(|source| GatewayError::Notebook {
            source,
            running: false,
        })?;

    ok(json!({
        "running": true,
        "pid": started.pid,
        "port": started.port,
        "spawned": started.spawned,
    }))
}

/// POST /stop-jupyter-server
pub async fn stop_jupyter_server(State(state): State<ApiState>) -> ApiResult {
    let report = state
        .notebook
        .stop()
        .await
        .map_err(|source| GatewayError::Notebook {
            source,
            running: true,
        })?;

    if !report.was_running() {
        return ok(json!({
            "running": false,
            "stoppedBy": null,
            "message": "No running Jupyter server found",
            "attempts": report.attempts,
        }));
    }

    ok(json!({
        "running": false,
        "stoppedBy": report.stopped_by,
        "attempts": report.attempts,
    }))
}

/// GET /status
pub async fn status(State(state): State<ApiState>) -> ApiResult {
    ok(GatewayStatus {
        pid: std::process::id(),
        port: state.port,
        uptime_secs: state.started_at.elapsed().as_secs(),
        working_directory: state.working_dir().await,
        database: state.database.status().await,
        notebook_running: state.notebook.owns_running_process().await,
    })
}

/// GET /check-requirements
pub async fn check_requirements(State(state): State<ApiState>) -> ApiResult {
    let summary = state.requirements.check().await;
    ok(json!({ "result": summary }))
}

/// POST /install-mongo
pub async fn install_mongo(State(state): State<ApiState>) -> ApiResult {
    state.requirements.install_mongo().await?;
    let summary = state.requirements.check().await;
    ok(json!({ "installed": true, "result": summary }))
}

/// POST /install-notebook-package
pub async fn install_notebook_package(State(state): State<ApiState>) -> ApiResult {
    state.requirements.install_notebook_package().await?;
    let summary = state.requirements.check().await;
    ok(json!({ "installed": true, "result": summary }))
}

fn python_query(query: Result<Query<PythonPathRequest>, QueryRejection>) -> Result<PythonPathRequest, GatewayError> {
    query
        .map(|Query(request)| request)
        .map_err(|e| GatewayError::BadRequest(e.to_string()))
}

fn requested_python(request: &PythonPathRequest) -> Option<&Path> {
    request
        .python_path
        .as_deref()
        .filter(|path| !path.trim().is_empty())
        .map(Path::new)
}

/// GET /get-bundled-python-environment
pub async fn get_bundled_python_environment(State(state): State<ApiState>) -> ApiResult {
    let python = state.notebook.resolve_runtime()?;
    ok(json!({ "pythonEnv": python }))
}

/// GET /get-installed-python-packages
pub async fn get_installed_python_packages(
    State(state): State<ApiState>,
    query: Result<Query<PythonPathRequest>, QueryRejection>,
) -> ApiResult {
    let request = python_query(query)?;
    let python = state.notebook.runtime_for(requested_python(&request))?;
    let packages = state.notebook.installed_packages(&python).await?;
    ok(json!({ "pythonPath": python, "packages": packages }))
}

/// GET /check-python-requirements
pub async fn check_python_requirements(
    State(state): State<ApiState>,
    query: Result<Query<PythonPathRequest>, QueryRejection>,
) -> ApiResult {
    let request = python_query(query)?;
    let python = state.notebook.runtime_for(requested_python(&request))?;
    let missing = state.notebook.missing_python_packages(&python).await?;
    ok(json!({
        "pythonPath": python,
        "requirementsMet": missing.is_empty(),
        "missing": missing,
    }))
}

/// POST /install-required-python-packages
pub async fn install_required_python_packages(
    State(state): State<ApiState>,
    body: Result<Json<PythonPathRequest>, JsonRejection>,
) -> ApiResult {
    let request = match body {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => PythonPathRequest::default(),
        Err(e) => return Err(GatewayError::BadRequest(format!("Invalid request body: {e}"))),
    };

    let installed = state
        .requirements
        .install_python_packages(requested_python(&request))
        .await?;
    ok(json!({ "installed": installed }))
}

/// POST /ensure-go
pub async fn ensure_go() -> ApiResult {
    Err(GatewayError::Unsupported(
        "The Go compute server is not supervised by this gateway".to_string(),
    ))
}
