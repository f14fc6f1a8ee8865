//! Message and Conversation domain types.
//!
//! Messages serialize to the OpenAI-compatible chat format verbatim, so the
//! history can be handed to any provider (or exported for a test harness)
//! without a conversion layer. Assistant messages keep every field the
//! provider sent that we do not model in `extra`, so provider-specific
//! features such as `reasoning_content` survive the round trip untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::token;

/// Literal marker that opens a compacted conversation's synthetic first message.
pub const SUMMARY_MARKER: &str = "[Conversation Summary]";

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
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
    /// The end user (or a queued injection)
    User,
    /// The language model
    Assistant,
    /// System instructions, prepended at request time
    System,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the assistant.
///
/// `arguments` is the raw JSON text the model produced; parsing is deferred
/// to dispatch time so malformed arguments can be reported back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireToolCall", into = "WireToolCall")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// `{"id": .., "type": "function", "function": {"name": .., "arguments": ..}}`
#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

#[derive(Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_kind() -> String {
    "function".into()
}

impl From<WireToolCall> for ToolCall {
    fn from(wire: WireToolCall) -> Self {
        Self {
            id: wire.id,
            name: wire.function.name,
            arguments: wire.function.arguments,
        }
    }
}

impl From<ToolCall> for WireToolCall {
    fn from(call: ToolCall) -> Self {
        Self {
            id: call.id,
            kind: function_kind(),
            function: WireFunction {
                name: call.name,
                arguments: call.arguments,
            },
        }
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    /// At most one, prepended at request time; never stored in the history.
    System { content: String },

    /// Free text from the operator or from a queued injection.
    User { content: String },

    /// One model turn. Tool calls dominate: when present, `content` is kept
    /// but the turn is not final.
    Assistant {
        #[serde(default)]
        content: Option<String>,

        #[serde(
            default,
            skip_serializing_if = "Vec::is_empty",
            deserialize_with = "null_as_empty"
        )]
        tool_calls: Vec<ToolCall>,

        /// Provider fields we do not model (`reasoning_content`, ...), kept byte-for-byte.
        #[serde(flatten)]
        extra: serde_json::Map<String, serde_json::Value>,
    },

    /// The response to one `ToolCall`.
    Tool {
        tool_call_id: String,
        content: String,
    },
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<ToolCall>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ToolCall>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    /// Create a new assistant message carrying text only.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content: None,
            tool_calls,
            extra: serde_json::Map::new(),
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::System { .. } => Role::System,
            Message::User { .. } => Role::User,
            Message::Assistant { .. } => Role::Assistant,
            Message::Tool { .. } => Role::Tool,
        }
    }

    /// Text content, empty when the assistant sent none.
    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Tool { content, .. } => content,
            Message::Assistant { content, .. } => content.as_deref().unwrap_or(""),
        }
    }

    /// Tool calls requested by an assistant turn; empty for every other role.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Message::Tool { .. })
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Message::Tool { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    /// Provider-specific reasoning passthrough, if the model sent one.
    pub fn reasoning(&self) -> Option<&serde_json::Value> {
        match self {
            Message::Assistant { extra, .. } => extra
                .get("reasoning_content")
                .or_else(|| extra.get("reasoning")),
            _ => None,
        }
    }

    /// Length of the text the token estimate is computed from: the content
    /// plus, for assistant turns, the serialized tool-call payload.
    pub fn text_len(&self) -> usize {
        let calls = match self {
            Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
                serde_json::to_string(tool_calls).map(|s| s.len()).unwrap_or(0)
            }
            _ => 0,
        };
        self.content().len() + calls
    }
}

/// Check the tool-call pairing invariants over a message list.
///
/// Every assistant turn with tool calls must be followed immediately by one
/// `Tool` message per call, in call order, with matching ids; every `Tool`
/// message must belong to such a group. Returns a description of the first
/// violation found.
pub fn pairing_violation(messages: &[Message]) -> Option<String> {
    let mut i = 0;
    while i < messages.len() {
        match &messages[i] {
            Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
                for (offset, call) in tool_calls.iter().enumerate() {
                    let at = i + 1 + offset;
                    match messages.get(at).and_then(Message::tool_call_id) {
                        Some(id) if id == call.id => {}
                        Some(id) => {
                            return Some(format!(
                                "message {at}: tool response '{id}' does not answer call '{}'",
                                call.id
                            ));
                        }
                        None => {
                            return Some(format!(
                                "message {at}: call '{}' from message {i} has no tool response",
                                call.id
                            ));
                        }
                    }
                }
                i += 1 + tool_calls.len();
            }
            Message::Tool { tool_call_id, .. } => {
                return Some(format!("message {i}: orphan tool response '{tool_call_id}'"));
            }
            Message::System { .. } => {
                return Some(format!("message {i}: system message stored in history"));
            }
            _ => i += 1,
        }
    }
    None
}

/// A conversation is an ordered sequence of messages plus an optional
/// system prompt that is prepended at request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered messages, insertion order
    messages: Vec<Message>,

    /// System prompt, never stored among the messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_prompt: Option<String>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the history was last mutated
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            system_prompt: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create an empty conversation with a system prompt.
    pub fn with_system_prompt(system_prompt: impl Into<String>) -> Self {
        let mut conv = Self::new();
        conv.system_prompt = Some(system_prompt.into());
        conv
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn set_system_prompt(&mut self, system_prompt: Option<String>) {
        self.system_prompt = system_prompt;
    }

    /// Add a message to the conversation.
    ///
    /// System messages are folded into the system prompt instead of being
    /// stored. An assistant turn with tool calls must be followed by its
    /// tool responses before anything else is appended.
    pub fn append(&mut self, message: Message) {
        if let Message::System { content } = message {
            self.system_prompt = Some(content);
            return;
        }
        self.touch();
        self.messages.push(message);
    }

    /// Append the response to one tool call.
    pub fn append_tool_response(&mut self, tool_call_id: impl Into<String>, content: impl Into<String>) {
        self.append(Message::tool_result(tool_call_id, content));
    }

    /// A stable, ordered copy of the history.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Borrow the history without copying.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Wholesale replacement, used by the compactor.
    pub fn replace(&mut self, messages: Vec<Message>) {
        debug_assert!(
            pairing_violation(&messages).is_none(),
            "replacement breaks tool-call pairing: {:?}",
            pairing_violation(&messages)
        );
        self.touch();
        self.messages = messages;
    }

    /// Drop every message (the system prompt is kept).
    pub fn clear(&mut self) {
        self.touch();
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Deterministic token estimate of the stored history.
    pub fn estimated_tokens(&self) -> usize {
        token::estimate_messages_tokens(&self.messages)
    }

    /// The request prompt: `[system]? ++ messages`.
    pub fn build_prompt(&self) -> Vec<Message> {
        let mut prompt = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = &self.system_prompt {
            prompt.push(Message::system(system.clone()));
        }
        prompt.extend(self.messages.iter().cloned());
        prompt
    }

    /// Export the raw history as an OpenAI-compatible message array.
    pub fn export_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.messages)?)
    }

    /// Replace the history with an OpenAI-compatible message array.
    ///
    /// A leading system message becomes the system prompt. The remaining
    /// list must satisfy the tool-call pairing invariants.
    pub fn import_json(&mut self, value: serde_json::Value) -> Result<()> {
        let mut messages: Vec<Message> = serde_json::from_value(value)?;
        let system_prompt = match messages.first() {
            Some(Message::System { content }) => {
                let content = content.clone();
                messages.remove(0);
                Some(content)
            }
            _ => None,
        };
        if let Some(violation) = pairing_violation(&messages) {
            return Err(Error::InvalidConversation(violation));
        }
        if system_prompt.is_some() {
            self.system_prompt = system_prompt;
        }
        self.touch();
        self.messages = messages;
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
