//! Commerce/subscription backend client.
//!
//! Every catalog action is a JSON `POST {api_url}/hackathon/<path>`. Replies
//! are normalised onto the `{success, data | error}` envelope before the
//! executor sees them:
//!
//! - `success: true` → the `data` field (or `null`)
//! - `success: false` with a string `error` → that error
//! - neither `success` nor `error` present → the whole body is the data
//! - only a string `error` present → that error
//! - anything else → "Unexpected response shape"

use async_trait::async_trait;
use deskpilot_core::error::ActionError;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Message used when no backend URL is configured.
pub const API_URL_NOT_SET: &str = "API_URL is not set.";

/// A backend reachable by path.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A human-readable name ("http", "mock").
    fn name(&self) -> &str;

    /// Call `path` with a JSON body; returns the envelope's data on success.
    async fn call(&self, path: &str, body: Value) -> Result<Value, ActionError>;
}

/// The real HTTP backend.
pub struct HttpBackend {
    base_url: Option<String>,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url
                .filter(|u| !u.trim().is_empty())
                .map(|u| u.trim_end_matches('/').to_string()),
            client,
        }
    }

    pub fn from_config(config: &deskpilot_config::AppConfig) -> Self {
        Self::new(
            config.backend.api_url.clone(),
            Duration::from_secs(config.backend.timeout_secs),
        )
    }

    fn url(&self, path: &str) -> Option<String> {
        self.base_url
            .as_ref()
            .map(|base| format!("{}/hackathon/{}", base, path.trim_start_matches('/')))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn call(&self, path: &str, body: Value) -> Result<Value, ActionError> {
        let Some(url) = self.url(path) else {
            warn!(path, "Backend call skipped: API_URL is not set");
            return Err(ActionError::Backend(API_URL_NOT_SET.into()));
        };

        debug!(url = %url, "Calling backend");
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ActionError::Backend(e.to_string()))?;

        let status = response.status().as_u16();
        let raw = response
            .text()
            .await
            .map_err(|e| ActionError::Backend(e.to_string()))?;

        debug!(
            url = %url,
            status,
            duration_ms = start.elapsed().as_millis() as u64,
            "Backend replied"
        );

        let payload: Value = serde_json::from_str(&raw)
            .map_err(|_| ActionError::Backend("Invalid JSON response.".into()))?;
        normalize_envelope(payload)
    }
}

/// Map a backend reply onto success data or an error.
pub fn normalize_envelope(payload: Value) -> Result<Value, ActionError> {
    let Value::Object(mut map) = payload else {
        return Err(ActionError::Backend("Invalid JSON response.".into()));
    };

    let success = map.get("success").cloned();
    let error = map.get("error").cloned();

    match (success, error) {
        (Some(Value::Bool(true)), _) => Ok(map.remove("data").unwrap_or(Value::Null)),
        (Some(Value::Bool(false)), Some(Value::String(e))) => Err(ActionError::Backend(e)),
        (None, None) => Ok(Value::Object(map)),
        (_, Some(Value::String(e))) => Err(ActionError::Backend(e)),
        _ => {
            let shape: String = Value::Object(map).to_string().chars().take(200).collect();
            Err(ActionError::Backend(format!("Unexpected response shape: {shape}")))
        }
    }
}
