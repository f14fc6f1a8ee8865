//! Agent-level events.
//!
//! `AgentEvent` is the single stream a UI observes while the agent works.
//! Events are delivered over a caller-owned channel; there is no global bus.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Events emitted by the agent during a run.
///
/// Serialized with a `type` tag so they can be forwarded to clients as-is:
/// - `content_chunk` / `reasoning_chunk` — streamed model output
/// - `tool_called` / `tool_result`      — tool dispatch
/// - `compacting`                       — context was reduced
/// - `heartbeat` / `token_usage` / `stuck_detected` — supervision
/// - `run_complete` / `run_aborted` / `run_error`   — terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A streamed content delta.
    ContentChunk { text: String },

    /// A streamed reasoning delta.
    ReasoningChunk { text: String },

    /// About to dispatch a tool; `arguments` is the model's raw JSON text.
    ToolCalled { name: String, arguments: String },

    /// A tool returned (or was answered on its behalf).
    ToolResult { name: String, result: String },

    /// Diagnostics: iteration summaries, compaction notes, fallbacks.
    VerboseOutput { text: String },

    /// A compaction layer fired.
    Compacting {
        layer: u8,
        before_tokens: usize,
        after_tokens: usize,
    },

    /// Periodic tick while streaming.
    Heartbeat { iteration: u32, elapsed_seconds: u64 },

    /// Session token totals, sent with every heartbeat.
    TokenUsage { input: u64, output: u64 },

    /// Nothing happened for `silent_seconds`.
    StuckDetected { iteration: u32, silent_seconds: u64 },

    /// A transient transport failure is being retried.
    Retrying {
        attempt: u32,
        max_attempts: u32,
        error: String,
    },

    /// A queued user message is about to be injected.
    ProcessingQueuedRequest { text: String, remaining: usize },

    /// The run finished with a final answer.
    RunComplete { content: String },

    /// The run was aborted; carries whatever content the last turn produced.
    RunAborted { partial_content: String },

    /// The run failed.
    RunError { message: String },
}

impl AgentEvent {
    /// Wire name of this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ContentChunk { .. } => "content_chunk",
            Self::ReasoningChunk { .. } => "reasoning_chunk",
            Self::ToolCalled { .. } => "tool_called",
            Self::ToolResult { .. } => "tool_result",
            Self::VerboseOutput { .. } => "verbose_output",
            Self::Compacting { .. } => "compacting",
            Self::Heartbeat { .. } => "heartbeat",
            Self::TokenUsage { .. } => "token_usage",
            Self::StuckDetected { .. } => "stuck_detected",
            Self::Retrying { .. } => "retrying",
            Self::ProcessingQueuedRequest { .. } => "processing_queued_request",
            Self::RunComplete { .. } => "run_complete",
            Self::RunAborted { .. } => "run_aborted",
            Self::RunError { .. } => "run_error",
        }
    }

    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunComplete { .. } | Self::RunAborted { .. } | Self::RunError { .. }
        )
    }
}

/// Sending half of the event surface.
///
/// Cheap to clone. A disabled sink drops everything, and a sink whose
/// receiver is gone drops silently too: observers are optional.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl EventSink {
    /// A connected sink and the receiver the caller drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Emit a `VerboseOutput` event and mirror it to the debug log.
    pub fn verbose(&self, text: impl Into<String>) {
        let text = text.into();
        debug!("{text}");
        self.emit(AgentEvent::VerboseOutput { text });
    }
}
