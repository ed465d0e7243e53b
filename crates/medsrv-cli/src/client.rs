use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::error::SupervisorError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Minimal JSON client for a running gateway.
///
/// Gateway failures still carry a JSON envelope, so non-2xx responses are
/// returned as values; only transport errors and non-JSON bodies are errors.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    base_url: String,
    http: Client,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SupervisorError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SupervisorError::Gateway {
                path: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn for_port(port: u16, timeout: Duration) -> Result<Self, SupervisorError> {
        Self::new(format!("http://127.0.0.1:{port}"), timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, path: &str) -> Result<Value, SupervisorError> {
        debug!(path, "GET");
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .map_err(|e| transport(path, e))?;
        decode(path, response).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, SupervisorError> {
        debug!(path, "POST");
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| transport(path, e))?;
        decode(path, response).await
    }
}

/// Whether a gateway envelope reports success.
pub fn is_success(body: &Value) -> bool {
    body.get("success").and_then(Value::as_bool).unwrap_or(false)
}

fn transport(path: &str, error: reqwest::Error) -> SupervisorError {
    SupervisorError::Gateway {
        path: path.to_string(),
        reason: error.to_string(),
    }
}

async fn decode(path: &str, response: reqwest::Response) -> Result<Value, SupervisorError> {
    let status = response.status();
    let text = response.text().await.map_err(|e| transport(path, e))?;
    serde_json::from_str(&text).map_err(|_| SupervisorError::Gateway {
        path: path.to_string(),
        reason: format!("HTTP {status} with non-JSON body"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_flag() {
        assert!(is_success(&json!({ "success": true })));
        assert!(!is_success(&json!({ "success": false, "error": "x" })));
        assert!(!is_success(&json!({ "ok": true })));
    }

    #[test]
    fn trailing_slash_is_dropped() {
        let client = GatewayClient::new("http://127.0.0.1:3000/", DEFAULT_REQUEST_TIMEOUT).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:3000");
    }
}
