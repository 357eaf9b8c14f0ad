//! HTTP gateway for deskpilot.
//!
//! Exposes the dispatcher over REST: blocking and NDJSON-streaming turn
//! endpoints, session inspection, a live SSE log of domain events, and a
//! health check.
//!
//! Built on Axum for high performance async HTTP.

pub mod api_v1;

#[cfg(test)]
pub(crate) mod test_helpers;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use deskpilot_actions::{Backend, HttpBackend, MockBackend, default_registry};
use deskpilot_config::AppConfig;
use deskpilot_core::event::EventBus;
use deskpilot_dispatch::Dispatcher;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub dispatcher: Dispatcher,
    pub start_time: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            start_time: Utc::now(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers applied:
/// - CORS restricted to the local gateway origin
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(HeaderValue::from_static("http://localhost:3000")))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Wire the dispatcher from configuration.
///
/// `backend` is the commerce collaborator every catalog action talks to.
pub async fn build_dispatcher(
    config: &AppConfig,
    backend: Arc<dyn Backend>,
    events: Arc<EventBus>,
) -> Result<Dispatcher, deskpilot_core::Error> {
    let provider = deskpilot_providers::router::build_from_config(config)
        .default()
        .ok_or_else(|| {
            deskpilot_core::Error::config(
                format!("Provider '{}' is not available", config.default_provider),
                "Set default_provider in ~/.deskpilot/config.toml to a configured provider",
            )
        })?;
    let store = deskpilot_sessions::store_from_config(config).await?;
    let policies = deskpilot_config::policy_provider(config);

    Ok(
        Dispatcher::from_config(config, provider, default_registry(backend), store, policies)
            .with_event_bus(events),
    )
}

/// The commerce backend: the in-process mock, or HTTP against `API_URL`.
pub fn backend_from_config(config: &AppConfig, mock: bool) -> Arc<dyn Backend> {
    if mock {
        info!("Using the in-process mock commerce backend");
        return Arc::new(MockBackend::new());
    }
    if config.require_backend_url().is_err() {
        warn!("API_URL is not set; every backend action will return an error result");
    }
    Arc::new(HttpBackend::from_config(config))
}

/// Start the gateway HTTP server.
///
/// A missing language-model credential stops startup with a remediation
/// hint rather than failing every turn later.
pub async fn start(config: AppConfig, mock_backend: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.require_api_key()?;

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let backend = backend_from_config(&config, mock_backend);
    let dispatcher = build_dispatcher(&config, backend, Arc::new(EventBus::default())).await?;
    let app = build_router(Arc::new(GatewayState::new(dispatcher)));

    info!(
        addr = %addr,
        sessions = %config.sessions.backend,
        policy = ?config.dispatch.escalation_policy,
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
