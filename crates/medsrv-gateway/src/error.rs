use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use medsrv_services::ServiceError;
use medsrv_types::ErrorEnvelope;
use serde_json::json;
use tracing::error;

/// Failures of a gateway request, rendered as `{success: false, error}`
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unsupported(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Notebook failures also report whether the server is running
    #[error("{source}")]
    Notebook { source: ServiceError, running: bool },

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            GatewayError::Service(e) | GatewayError::Notebook { source: e, .. } => {
                if e.is_client_error() {
                    StatusCode::BAD_REQUEST
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let body = match &self {
            GatewayError::Notebook { running, .. } => json!({
                "success": false,
                "running": running,
                "error": self.to_string(),
            }),
            _ => json!(ErrorEnvelope::failure(self.to_string())),
        };
        (status, Json(body)).into_response()
    }
}
