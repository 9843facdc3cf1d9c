//! Message and Conversation domain types.
//!
//! These are the core value objects that flow through the entire system:
//! Client sends a message → Session receives it → Orchestrator runs steps → Parts stream back.
//!
//! A [`Message`] is an ordered list of [`Part`]s. One assistant message holds
//! every part produced while answering a single user message, across all of
//! the generation steps of that turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Request-time directive; never stored in a conversation
    System,
    /// Tool execution result
    Tool,
}

/// Streaming state of a reasoning part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningState {
    Streaming,
    Done,
}

/// Approval state carried by every tool result.
///
/// Tools that need no confirmation go straight to `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalState {
    Requested,
    Approved,
    Rejected,
    Completed,
}

/// Structured outcome of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutput {
    /// The tool produced a value.
    Value(serde_json::Value),
    /// The tool failed; the message is shown to the model.
    Error(String),
}

impl ToolOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Render the output as the string sent back to the model.
    pub fn to_model_text(&self) -> String {
        match self {
            Self::Value(v) => serde_json::to_string(v).unwrap_or_default(),
            Self::Error(e) => format!("Error: {e}"),
        }
    }
}

/// One atomic unit of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
        state: ReasoningState,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        output: ToolOutput,
        approval: ApprovalState,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Whether this part carries tool-call or tool-result detail.
    pub fn is_tool_payload(&self) -> bool {
        matches!(self, Self::ToolCall { .. } | Self::ToolResult { .. })
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    #[serde(default = "new_message_id")]
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// Ordered content parts
    #[serde(default)]
    pub parts: Vec<Part>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: new_message_id(),
            role,
            parts,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message with a single text part.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(content)])
    }

    /// Create a new assistant message with a single text part.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::text(content)])
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(content)])
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Call IDs of tool-call parts with no matching tool-result part.
    pub fn unresolved_tool_calls(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolCall { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .filter(|id| {
                !self.parts.iter().any(
                    |p| matches!(p, Part::ToolResult { call_id, .. } if call_id == id),
                )
            })
            .collect()
    }

    /// Number of tool-call parts naming the given tool.
    pub fn tool_call_count(&self, tool_name: &str) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, Part::ToolCall { tool_name: n, .. } if n == tool_name))
            .count()
    }
}

/// A conversation is an ordered, append-only sequence of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self::with_id(ConversationId::new())
    }

    pub fn with_id(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Drop every message. Only an explicit history clear does this.
    pub fn clear(&mut self) {
        self.updated_at = Utc::now();
        self.messages.clear();
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
