//! WebSocket frames exchanged with a session's client.
//!
//! Every frame is a JSON object with a `type` tag. Turn progress is sent as
//! [`UiEvent`]s unchanged; session-level notices use [`SessionFrame`].

use chrono::{DateTime, Utc};
use deepdive_agent::UiEvent;
use deepdive_core::message::{Message, Part, Role};
use serde::{Deserialize, Serialize};

fn user_role() -> Role {
    Role::User
}

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// A new user message; starts a turn.
    Message {
        #[serde(default = "user_role")]
        role: Role,
        parts: Vec<Part>,
    },
    /// Result of a client-owned tool call. `error` wins over `output`.
    ToolResult {
        call_id: String,
        #[serde(default)]
        output: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    },
    /// Decision on an `approval-requested` event.
    ApprovalResponse { id: String, approved: bool },
    /// Abort the running turn.
    Cancel,
    /// Drop the whole conversation.
    ClearHistory,
    /// Ask for a `scheduled-task` notice after a delay.
    ScheduleTask {
        description: String,
        #[serde(default)]
        delay_seconds: u64,
    },
    /// Drop a pending scheduled task.
    CancelTask { id: String },
}

/// Session-level frames sent outside of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionFrame {
    /// Full conversation; first frame on every connection.
    History { messages: Vec<Message> },
    /// Acknowledges a `schedule-task` request.
    TaskScheduled {
        id: String,
        description: String,
        fire_at: DateTime<Utc>,
    },
    /// A scheduled task came due.
    ScheduledTask {
        id: String,
        description: String,
        timestamp: DateTime<Utc>,
    },
    HistoryCleared,
}

/// Anything the server sends on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Event(UiEvent),
    Session(SessionFrame),
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Event(UiEvent::Error {
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<UiEvent> for ServerFrame {
    fn from(event: UiEvent) -> Self {
        Self::Event(event)
    }
}

impl From<SessionFrame> for ServerFrame {
    fn from(frame: SessionFrame) -> Self {
        Self::Session(frame)
    }
}

impl ClientFrame {
    /// Build the user message carried by a `message` frame.
    pub fn into_user_message(role: Role, parts: Vec<Part>) -> Result<Message, String> {
        if role != Role::User {
            return Err(format!("Clients may only send user messages, got {role:?}"));
        }
        if !parts.iter().any(|p| matches!(p, Part::Text { text } if !text.trim().is_empty())) {
            return Err("Message must contain non-empty text".into());
        }
        if parts.iter().any(|p| !matches!(p, Part::Text { .. })) {
            return Err("User messages may only contain text parts".into());
        }
        Ok(Message::new(Role::User, parts))
    }
}
