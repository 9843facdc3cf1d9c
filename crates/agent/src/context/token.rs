//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token, which is
//! close enough for logging how large a pruned context is.

use deepdive_core::message::{Message, Part};
use deepdive_core::provider::ToolDefinition;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let overhead = 4;
    overhead
        + message
            .parts
            .iter()
            .map(|part| match part {
                Part::Text { text } | Part::Reasoning { text, .. } => estimate_tokens(text),
                Part::ToolCall { input, .. } => estimate_tokens(&input.to_string()),
                Part::ToolResult { output, .. } => estimate_tokens(&output.to_model_text()),
            })
            .sum::<usize>()
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for a slice of tool definitions (serialized as JSON).
pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| estimate_tokens(&serde_json::to_string(t).unwrap_or_default()))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepdive_core::message::{ApprovalState, Role, ToolOutput};
    use deepdive_core::provider::ExecutionMode;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn message_includes_overhead() {
        let msg = Message::user("test"); // 1 token + 4 overhead
        assert_eq!(estimate_message_tokens(&msg), 5);
    }

    #[test]
    fn tool_results_count_toward_estimate() {
        let small = Message::assistant("ok");
        let big = Message::new(
            Role::Assistant,
            vec![Part::ToolResult {
                call_id: "c".into(),
                tool_name: "webSearch".into(),
                output: ToolOutput::Value(serde_json::json!({ "content": "x".repeat(2000) })),
                approval: ApprovalState::Completed,
            }],
        );
        assert!(estimate_messages_tokens(&[big]) > estimate_messages_tokens(&[small]) + 400);
    }

    #[test]
    fn tool_definition_tokens() {
        let tool = ToolDefinition {
            name: "webSearch".into(),
            description: "Search".into(),
            parameters: serde_json::json!({ "type": "object" }),
            execution: ExecutionMode::Server,
            requires_approval: false,
        };
        assert!(estimate_tools_tokens(&[tool]) > 0);
        assert_eq!(estimate_tools_tokens(&[]), 0);
    }
}
