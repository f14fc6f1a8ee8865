//! Server-sent-event assembly for OpenAI-compatible streaming responses.
//!
//! The assembler is transport-agnostic: feed it SSE lines (or bare `data`
//! payloads) in arrival order and forward the [`StreamEvent`]s it returns.
//! Exactly one terminal event (`Done` or `Error`) is ever produced.

use serde::Deserialize;
use socmate_core::message::{Message, ToolCall};
use socmate_core::provider::{StreamEvent, Usage};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Incrementally rebuilds one assistant turn from streamed deltas.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    content: String,
    reasoning: String,
    tool_calls: BTreeMap<u32, PartialToolCall>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    expect_usage: bool,
    finished: bool,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PartialToolCall {
    fn into_tool_call(self, index: u32) -> ToolCall {
        // A few local servers never send ids; pairing only needs them unique.
        let id = if self.id.is_empty() {
            format!("call_{index}")
        } else {
            self.id
        };
        ToolCall::new(id, self.name, self.arguments)
    }
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold completion back after a `finish_reason` until the usage trailer
    /// (requested with `stream_options.include_usage`), `[DONE]` or the end
    /// of the transport arrives.
    pub fn with_usage_trailer() -> Self {
        Self {
            expect_usage: true,
            ..Self::default()
        }
    }

    /// Whether a terminal event has already been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one raw SSE line (without its trailing newline).
    ///
    /// Blank lines, comments and non-`data` fields are ignored.
    pub fn push_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            return Vec::new();
        }

        match line.strip_prefix("data:") {
            Some(data) => self.push_data(data.strip_prefix(' ').unwrap_or(data)),
            None => {
                trace!(line = %line, "Ignoring non-data SSE field");
                Vec::new()
            }
        }
    }

    /// Feed the payload of one `data:` field.
    pub fn push_data(&mut self, data: &str) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let data = data.trim();
        if data.is_empty() {
            return Vec::new();
        }
        if data == "[DONE]" {
            return vec![self.complete()];
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => return vec![self.fail(format!("Failed to parse stream chunk: {e}"))],
        };

        if let Some(error) = chunk.error {
            return vec![self.fail(error_message(&error))];
        }

        let mut events = Vec::new();
        let usage_arrived = chunk.usage.is_some();
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());
        }

        for choice in chunk.choices {
            let delta = choice.delta;

            if let Some(text) = delta.reasoning_content.filter(|t| !t.is_empty()) {
                self.reasoning.push_str(&text);
                events.push(StreamEvent::Reasoning { text });
            }

            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                self.content.push_str(&text);
                events.push(StreamEvent::Chunk { text });
            }

            for fragment in delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match fragment.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };

                let slot = self.tool_calls.entry(fragment.index).or_default();
                if slot.id.is_empty()
                    && let Some(id) = fragment.id.as_deref()
                {
                    slot.id = id.to_string();
                }
                if slot.name.is_empty()
                    && let Some(name) = name.as_deref().filter(|n| !n.is_empty())
                {
                    slot.name = name.to_string();
                }
                if let Some(arguments) = arguments.as_deref() {
                    slot.arguments.push_str(arguments);
                }

                events.push(StreamEvent::ToolCallDelta {
                    index: fragment.index,
                    id: fragment.id,
                    name,
                    arguments_delta: arguments,
                });
            }

            if let Some(reason) = choice.finish_reason {
                debug!(finish_reason = %reason, "Stream reported finish");
                self.finish_reason = Some(reason);
            }
        }

        if self.finish_reason.is_some() && (!self.expect_usage || usage_arrived) {
            events.push(self.complete());
        }

        events
    }

    /// Signal that the transport closed.
    ///
    /// Returns the terminal event if none was produced yet: a synthesised
    /// `Done` when anything was accumulated, an `Error` otherwise.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        if self.finish_reason.is_some() || !self.content.is_empty() || !self.tool_calls.is_empty() {
            debug!("Stream closed without [DONE], completing with accumulated output");
            Some(self.complete())
        } else {
            Some(self.fail("Stream closed before any output was received".into()))
        }
    }

    fn complete(&mut self) -> StreamEvent {
        self.finished = true;

        let tool_calls: Vec<ToolCall> = std::mem::take(&mut self.tool_calls)
            .into_iter()
            .map(|(index, partial)| partial.into_tool_call(index))
            .collect();

        let mut extra = serde_json::Map::new();
        if !self.reasoning.is_empty() {
            extra.insert(
                "reasoning_content".into(),
                serde_json::Value::String(std::mem::take(&mut self.reasoning)),
            );
        }

        let content = std::mem::take(&mut self.content);
        let content = if content.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(content)
        };

        StreamEvent::Done {
            message: Message::Assistant {
                content,
                tool_calls,
                extra,
            },
            usage: self.usage,
        }
    }

    fn fail(&mut self, message: String) -> StreamEvent {
        self.finished = true;
        StreamEvent::Error { message }
    }
}

/// Pull a human-readable message out of a provider `error` value, which is
/// either an object with a `message` field or a bare string.
pub(crate) fn error_message(error: &serde_json::Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

// --- Streaming wire types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta. Arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}
