//! `GET /v1/sessions/{id}/ws`: the session channel.
//!
//! The read loop never blocks on a turn: turns run on their own task, so
//! `cancel`, `tool-result` and `approval-response` frames are handled while
//! generation is in progress. Outbound frames go through the session's
//! channel to a dedicated writer task.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use deepdive_agent::ExternalResolution;
use deepdive_core::error::ChannelError;
use deepdive_core::message::ToolOutput;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::SharedState;
use crate::frames::{ClientFrame, ServerFrame};
use crate::session::Session;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, session_id, state))
}

async fn handle_connection(socket: WebSocket, session_id: String, state: SharedState) {
    let session = state.sessions.get_or_create(&session_id).await;
    let (connection, mut outbound) = session.attach().await;
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(WsMessage::Text(frame.to_json().into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "WebSocket receive error");
                break;
            }
        };

        let frame = match serde_json::from_str::<ClientFrame>(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                session
                    .send(ServerFrame::error(
                        ChannelError::InvalidPayload(e.to_string()).to_string(),
                    ))
                    .await;
                continue;
            }
        };

        if let Err(e) = handle_frame(&state, &session, frame).await {
            warn!(session_id = %session_id, error = %e, "Rejected client frame");
            session.send(ServerFrame::error(e.to_string())).await;
        }
    }

    session.detach(&connection).await;
    writer.abort();
    info!(session_id = %session_id, "WebSocket connection closed");
}

async fn handle_frame(
    state: &SharedState,
    session: &Arc<Session>,
    frame: ClientFrame,
) -> Result<(), ChannelError> {
    match frame {
        ClientFrame::Message { role, parts } => {
            let message =
                ClientFrame::into_user_message(role, parts).map_err(ChannelError::InvalidPayload)?;
            session
                .start_turn(state.orchestrator.clone(), message)
                .await
        }
        ClientFrame::ToolResult {
            call_id,
            output,
            error,
        } => {
            let output = match error {
                Some(error) => ToolOutput::Error(error),
                None => ToolOutput::Value(output.unwrap_or(serde_json::Value::Null)),
            };
            session
                .resolve(ExternalResolution::ToolOutput { call_id, output })
                .await
        }
        ClientFrame::ApprovalResponse { id, approved } => {
            session
                .resolve(ExternalResolution::Approval {
                    approval_id: id,
                    approved,
                })
                .await
        }
        ClientFrame::Cancel => {
            if !session.cancel().await {
                debug!(session_id = %session.id(), "Cancel with no running turn");
            }
            Ok(())
        }
        ClientFrame::ClearHistory => session.clear_history().await,
        ClientFrame::ScheduleTask {
            description,
            delay_seconds,
        } => session
            .schedule(description, Duration::from_secs(delay_seconds))
            .await
            .map(|_| ()),
        ClientFrame::CancelTask { id } => session.cancel_task(&id).await,
    }
}
