//! UI stream events.
//!
//! `UiEvent` is what a running turn emits as it progresses. The gateway
//! forwards each event to the client as one WebSocket frame.

use deepdive_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Why a turn stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// The model produced a step without tool calls.
    Stop,
    /// The step cap was reached.
    StepLimit,
    /// The turn was cancelled.
    Cancelled,
    /// The generation call failed.
    Error,
}

impl FinishReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::StepLimit => "step-limit",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

/// Events emitted by the orchestrator during a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiEvent {
    /// A new assistant message has started.
    Start { message_id: String },

    /// Partial answer text.
    TextDelta { delta: String },

    /// Partial reasoning text.
    ReasoningDelta { delta: String },

    /// The current reasoning block is complete.
    ReasoningEnd,

    /// A tool call's input is fully known.
    ToolInputAvailable {
        call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },

    /// A client-owned tool is waiting for the client to answer.
    ToolAwaitingClient {
        call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },

    /// A tool call needs confirmation before it runs.
    ApprovalRequested {
        approval_id: String,
        call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },

    /// A tool call finished with output.
    ToolOutputAvailable {
        call_id: String,
        output: serde_json::Value,
    },

    /// A tool call finished with an error.
    ToolOutputError { call_id: String, error_text: String },

    /// The turn is over.
    Finish {
        message_id: String,
        finish_reason: FinishReason,
        steps: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// The turn failed.
    Error { message: String },
}

impl UiEvent {
    /// Wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::TextDelta { .. } => "text-delta",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ReasoningEnd => "reasoning-end",
            Self::ToolInputAvailable { .. } => "tool-input-available",
            Self::ToolAwaitingClient { .. } => "tool-awaiting-client",
            Self::ApprovalRequested { .. } => "approval-requested",
            Self::ToolOutputAvailable { .. } => "tool-output-available",
            Self::ToolOutputError { .. } => "tool-output-error",
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
        }
    }
}
