//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `GET    /v1/sessions/{id}/ws`:        Session channel (WebSocket)
//! - `GET    /v1/sessions/{id}/messages`:  Stored conversation
//! - `DELETE /v1/sessions/{id}/messages`:  Clear history
//! - `GET    /v1/tools`:                   Tool declarations
//! - `GET    /v1/logs`:                    SSE stream of domain events

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use deepdive_core::error::ChannelError;
use deepdive_core::message::Message;
use deepdive_core::provider::{ExecutionMode, ToolDefinition};
use deepdive_core::session::{ConnectionState, ScheduledTask};

use crate::SharedState;
use crate::ws::ws_handler;

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router() -> Router<SharedState> {
    Router::new()
        .route("/sessions/{id}/ws", get(ws_handler))
        .route(
            "/sessions/{id}/messages",
            get(get_messages_handler).delete(clear_messages_handler),
        )
        .route("/tools", get(list_tools_handler))
        .route("/logs", get(log_stream_handler))
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct MessagesResponse {
    pub session_id: String,
    pub state: ConnectionState,
    pub busy: bool,
    pub messages: Vec<Message>,
    pub scheduled_tasks: Vec<ScheduledTask>,
}

#[derive(Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolDto>,
    pub count: usize,
}

#[derive(Serialize, Deserialize)]
pub struct ToolDto {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub execution: ExecutionMode,
    pub requires_approval: bool,
}

impl From<ToolDefinition> for ToolDto {
    fn from(d: ToolDefinition) -> Self {
        Self {
            name: d.name,
            description: d.description,
            parameters: d.parameters,
            execution: d.execution,
            requires_approval: d.requires_approval,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn get_messages_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let session = state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Unknown session '{id}'")))?;

    Ok(Json(MessagesResponse {
        session_id: id,
        state: session.connection_state().await,
        busy: session.is_busy().await,
        messages: session.messages().await,
        scheduled_tasks: session.scheduled_tasks().await,
    }))
}

async fn clear_messages_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Unknown session '{id}'")))?;

    match session.clear_history().await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e @ ChannelError::Busy) => Err(api_error(StatusCode::CONFLICT, e.to_string())),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools: Vec<ToolDto> = state
        .orchestrator
        .tools()
        .describe()
        .into_iter()
        .map(ToolDto::from)
        .collect();
    let count = tools.len();
    Json(ToolListResponse { tools, count })
}

// ── SSE Log Stream ────────────────────────────────────────────────────────

/// `GET /v1/logs`: SSE stream of domain events (turns, steps, tool calls).
async fn log_stream_handler(
    State(state): State<SharedState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.event_bus.subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event.event_name()).data(data))
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
