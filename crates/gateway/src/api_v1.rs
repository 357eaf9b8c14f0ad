//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/chat`: Run one turn, get the full result
//! - `POST /v1/chat/stream`: Run one turn, get NDJSON events
//! - `GET  /v1/sessions/{id}`: Stored conversation state
//! - `GET  /v1/status`: Store and uptime summary
//! - `GET  /v1/logs`: SSE stream of domain events

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::{error, info};

use deskpilot_core::ErrorKind;
use deskpilot_core::state::ConversationState;
use deskpilot_dispatch::{TurnOutcome, TurnRequest};

use crate::SharedState;

/// NDJSON content type for the streaming endpoint.
pub const NDJSON: &str = "application/x-ndjson";

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/sessions/{id}", get(get_session_handler))
        .route("/status", get(status_handler))
        .route("/logs", get(log_stream_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Existing session ID (omit to start a new one).
    #[serde(default)]
    pub session_id: Option<String>,

    #[serde(default, alias = "message")]
    pub utterance: String,

    #[serde(default)]
    pub customer_context: Map<String, Value>,
}

impl ChatRequest {
    /// Reject what the dispatch loop should never see.
    fn into_turn(self) -> Result<TurnRequest, ApiError> {
        if self.utterance.trim().is_empty() {
            return Err(ApiError::invalid("utterance must not be empty"));
        }
        let session_id = self
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Ok(TurnRequest {
            session_id,
            utterance: self.utterance,
            customer_context: self.customer_context,
        })
    }
}

/// The error envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub kind: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, kind: &str, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                success: false,
                kind: kind.into(),
                error: error.into(),
                suggestion: None,
            },
        }
    }

    fn invalid(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", error)
    }

    fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal.as_str(), error)
    }
}

impl From<deskpilot_core::Error> for ApiError {
    fn from(e: deskpilot_core::Error) -> Self {
        let kind = e.kind();
        let status = match kind {
            ErrorKind::Configuration => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut err = Self::new(status, kind.as_str(), e.to_string());
        err.body.suggestion = e.remediation();
        err
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub uptime_secs: i64,
    pub session_store: String,
    pub sessions: usize,
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /v1/chat`: run one turn to completion.
///
/// The turn runs on its own task, so a client that hangs up mid-turn never
/// interrupts persistence.
async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let turn = payload.into_turn()?;
    info!(session_id = %turn.session_id, "v1/chat request");

    let dispatcher = state.dispatcher.clone();
    let outcome = tokio::spawn(async move { dispatcher.run_turn(turn).await })
        .await
        .map_err(|e| {
            error!(error = %e, "Turn task failed");
            ApiError::internal(format!("Turn task failed: {e}"))
        })??;

    Ok(Json(outcome))
}

// ── NDJSON Streaming ──────────────────────────────────────────────────────

/// `POST /v1/chat/stream`: run one turn, one JSON event per line.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let turn = payload.into_turn()?;
    info!(session_id = %turn.session_id, "v1/chat/stream request");

    let rx = state.dispatcher.run_stream(turn);
    let lines = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(event.to_ndjson()));

    Response::builder()
        .header(header::CONTENT_TYPE, NDJSON)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(lines))
        .map_err(|e| ApiError::internal(e.to_string()))
}

// ── Sessions ──────────────────────────────────────────────────────────────

/// `GET /v1/sessions/{id}`: the stored state, 404 if never saved.
async fn get_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationState>, ApiError> {
    let stored = state
        .dispatcher
        .store()
        .get(&id)
        .await
        .map_err(|e| ApiError::from(deskpilot_core::Error::from(e)))?;

    stored
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "not_found", format!("Session '{id}' not found")))
}

async fn status_handler(State(state): State<SharedState>) -> Result<Json<StatusResponse>, ApiError> {
    let store = state.dispatcher.store();
    let sessions = store
        .count()
        .await
        .map_err(|e| ApiError::from(deskpilot_core::Error::from(e)))?;

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
        session_store: store.name().into(),
        sessions,
    }))
}

// ── SSE Log Stream ────────────────────────────────────────────────────────

/// `GET /v1/logs`: SSE stream of domain events (turns, actions, escalations).
async fn log_stream_handler(
    State(state): State<SharedState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.dispatcher.events().subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event.event_type()).data(data))
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
