//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token, plus a fixed
//! per-message overhead for role names and wire delimiters. The numbers only
//! drive compaction thresholds, so determinism matters more than accuracy.

use crate::message::Message;
use crate::tool::ToolDefinition;

/// Fixed cost charged for every message on top of its text.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 10;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 bytes, rounded down.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Estimate tokens for a single message including per-message overhead.
///
/// Tool-call payloads are charged by the length of their serialized JSON.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD_TOKENS + message.text_len() / 4
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for a tool definition (serialized as JSON).
pub fn estimate_tool_tokens(tool: &ToolDefinition) -> usize {
    let json = serde_json::to_string(tool).unwrap_or_default();
    estimate_tokens(&json)
}

/// Estimate tokens for a slice of tool definitions.
pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools.iter().map(estimate_tool_tokens).sum()
}
