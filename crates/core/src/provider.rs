//! LLM client trait — the abstraction over model transports.
//!
//! The agent core consumes exactly two operations: a blocking completion and
//! a streaming completion that can be cancelled. How the HTTP request is made
//! and how server-sent events are parsed is the transport's business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::ToolDefinition;

/// Requested output format, passed through to the provider untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            kind: "json_object".into(),
        }
    }
}

/// One chat-completions request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The OpenAI-compatible message list, system prompt first if any
    pub messages: Vec<Message>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Sampling temperature
    pub temperature: f32,

    /// Whether the response should be streamed
    #[serde(default)]
    pub stream: bool,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, tools: Vec<ToolDefinition>, temperature: f32) -> Self {
        Self {
            messages,
            tools,
            temperature,
            stream: false,
            max_tokens: None,
            response_format: None,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The assistant turn, verbatim as the provider sent it
    pub message: Message,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded
    #[serde(default)]
    pub model: String,
}

/// Incremental output of a streaming completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A content delta.
    Chunk { text: String },

    /// A provider-specific reasoning delta.
    Reasoning { text: String },

    /// A fragment of the tool call at `index`.
    ToolCallDelta {
        index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments_delta: Option<String>,
    },

    /// The assembled assistant turn. Always the last event of a good stream.
    Done {
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// The stream failed; no `Done` follows.
    Error { message: String },
}

/// The contract every model transport implements.
///
/// The agent calls `complete()` or `stream()` without knowing which
/// provider sits behind it.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openai", "ollama").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    ///
    /// A response carrying an `error` field instead of choices must surface
    /// as [`ProviderError::Model`].
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Send a request and get a stream of events.
    ///
    /// Default implementation calls `complete()` and replays the result as a
    /// single content chunk followed by `Done`.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(2);
        let content = response.message.content().to_string();
        if !content.is_empty() {
            let _ = tx.send(StreamEvent::Chunk { text: content }).await;
        }
        let _ = tx
            .send(StreamEvent::Done {
                message: response.message,
                usage: response.usage,
            })
            .await;
        Ok(rx)
    }

    /// Cancel any in-flight stream. Must not block.
    fn cancel(&self) {}
}
