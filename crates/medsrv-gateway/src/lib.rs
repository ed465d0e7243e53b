//! HTTP gateway supervising the database and notebook services.
//!
//! Startup order: claim a port, report it to the supervisor (if any), then
//! serve. Requirement checks run in the background afterwards and never
//! block readiness.

pub mod config;
pub mod error;
pub mod handlers;
pub mod readiness;
pub mod state;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use state::ApiState;

use std::any::Any;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use medsrv_services::allocate_on;
use medsrv_types::ErrorEnvelope;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Allocation probes and the real bind are not atomic; retry if we lose the race
const BIND_ATTEMPTS: usize = 3;

/// Create the gateway router with all endpoints
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/set-working-directory", post(handlers::set_working_directory))
        .route("/get-working-dir-tree", get(handlers::get_working_dir_tree))
        .route("/start-mongo", post(handlers::start_mongo))
        .route("/stop-mongo", post(handlers::stop_mongo))
        .route("/get-mongo-path", get(handlers::get_mongo_path))
        .route("/check-jupyter-status", get(handlers::check_jupyter_status))
        .route("/start-jupyter-server", post(handlers::start_jupyter_server))
        .route("/stop-jupyter-server", post(handlers::stop_jupyter_server))
        .route("/status", get(handlers::status))
        .route("/check-requirements", get(handlers::check_requirements))
        .route("/install-mongo", post(handlers::install_mongo))
        .route("/install-notebook-package", post(handlers::install_notebook_package))
        .route("/get-bundled-python-environment", get(handlers::get_bundled_python_environment))
        .route("/get-installed-python-packages", get(handlers::get_installed_python_packages))
        .route("/check-python-requirements", get(handlers::check_python_requirements))
        .route("/install-required-python-packages", post(handlers::install_required_python_packages))
        .route("/ensure-go", post(handlers::ensure_go))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(detail, "Handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorEnvelope::failure(format!("Internal error: {detail}"))),
    )
        .into_response()
}

/// Bind the lowest free port of the configured range
pub async fn bind_listener(config: &GatewayConfig) -> Result<(TcpListener, u16)> {
    let mut last_error = None;
    for attempt in 1..=BIND_ATTEMPTS {
        let port = allocate_on(config.host, &config.port_range)?;
        match TcpListener::bind((config.host, port)).await {
            Ok(listener) => return Ok((listener, port)),
            Err(e) => {
                warn!(attempt, port, error = %e, "Port taken between probe and bind");
                last_error = Some(e);
            }
        }
    }

    let error = last_error
        .map(anyhow::Error::from)
        .unwrap_or_else(|| anyhow::anyhow!("no bind attempt was made"));
    Err(error.context("Failed to bind gateway listener"))
}

/// Run the gateway until Ctrl-C or SIGTERM
pub async fn run(config: GatewayConfig) -> Result<()> {
    config.validate()?;

    let (listener, port) = bind_listener(&config).await?;
    let state = ApiState::new(config.services.clone(), port, config.tree_depth)?;
    let app = create_router(state.clone());
    info!(host = %config.host, port, "Gateway listening");

    match config.ready_addr {
        Some(addr) => readiness::notify_ready(addr, port).await?,
        None => info!("No supervisor address set, running standalone"),
    }

    let requirements = state.requirements.clone();
    tokio::spawn(async move {
        let summary = requirements.check_and_install().await;
        for report in summary.missing() {
            warn!(service = %report.service_name, "Requirement missing");
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Gateway server error")?;

    state.shutdown().await;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("Received Ctrl-C, shutting down"),
        _ = terminate => warn!("Received SIGTERM, shutting down"),
    }
}
