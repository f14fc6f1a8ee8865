//! Shared test helpers: scripted clients and stub tools.

use async_trait::async_trait;
use socmate_core::error::{ProviderError, ToolError};
use socmate_core::message::{Message, ToolCall};
use socmate_core::provider::{CompletionRequest, CompletionResponse, LlmClient, StreamEvent, Usage};
use socmate_core::tool::Tool;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Notify, mpsc};

use crate::event::AgentEvent;

/// A client that replays scripted responses in sequence.
///
/// `complete` pops from the completion script, `stream` from the stream
/// script. Panics if more calls are made than responses provided.
pub struct ScriptedClient {
    completions: Mutex<VecDeque<Result<CompletionResponse, ProviderError>>>,
    streams: Mutex<VecDeque<Vec<StreamEvent>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    cancels: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            completions: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
        }
    }

    pub fn with_completions(responses: Vec<Result<CompletionResponse, ProviderError>>) -> Self {
        let client = Self::new();
        client.completions.lock().unwrap().extend(responses);
        client
    }

    pub fn with_streams(scripts: Vec<Vec<StreamEvent>>) -> Self {
        let client = Self::new();
        client.streams.lock().unwrap().extend(scripts);
        client
    }

    /// Every request seen so far, blocking and streaming alike.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedClient: no more completions")
    }

    async fn stream(&self, request: CompletionRequest) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedClient: no more streams");

        let (tx, rx) = mpsc::channel(script.len().max(1));
        for event in script {
            tx.try_send(event).unwrap();
        }
        Ok(rx)
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// A client whose requests never finish.
///
/// `complete` announces itself and hangs. `stream` delivers the given
/// chunks and then keeps the channel open without ever sending `Done`.
#[derive(Default)]
pub struct StallingClient {
    chunks: Vec<String>,
    started: Notify,
    open_streams: Mutex<Vec<mpsc::Sender<StreamEvent>>>,
    cancels: AtomicUsize,
}

impl StallingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunks(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for StallingClient {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.started.notify_one();
        std::future::pending().await
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let (tx, rx) = mpsc::channel(self.chunks.len().max(1));
        for text in &self.chunks {
            tx.try_send(StreamEvent::Chunk { text: text.clone() }).unwrap();
        }
        self.open_streams.lock().unwrap().push(tx);
        self.started.notify_one();
        Ok(rx)
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

/// Create a simple text response (no tool calls).
pub fn text_response(text: &str) -> CompletionResponse {
    CompletionResponse {
        message: Message::assistant(text),
        usage: usage(),
        model: "mock-model".into(),
    }
}

/// Create a response requesting tool calls.
pub fn tool_call_response(tool_calls: Vec<ToolCall>) -> CompletionResponse {
    CompletionResponse {
        message: Message::assistant_tool_calls(tool_calls),
        usage: usage(),
        model: "mock-model".into(),
    }
}

/// Helper to create a tool call with JSON arguments.
pub fn make_tool_call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::new(id, name, serde_json::to_string(&args).unwrap())
}

/// A stream that yields `text` as one chunk and completes.
pub fn stream_text(text: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::Chunk { text: text.into() },
        StreamEvent::Done {
            message: Message::assistant(text),
            usage: usage(),
        },
    ]
}

/// A stream that assembles the given tool calls and completes.
pub fn stream_tool_calls(calls: Vec<ToolCall>) -> Vec<StreamEvent> {
    let mut events: Vec<StreamEvent> = calls
        .iter()
        .enumerate()
        .map(|(index, call)| StreamEvent::ToolCallDelta {
            index: index as u32,
            id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            arguments_delta: Some(call.arguments.clone()),
        })
        .collect();
    events.push(StreamEvent::Done {
        message: Message::assistant_tool_calls(calls),
        usage: usage(),
    });
    events
}

/// Collect every event currently buffered in the receiver.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Returns its `msg` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the msg argument"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "msg": { "type": "string" } },
            "required": ["msg"]
        })
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        arguments["msg"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'msg' argument".into()))
    }
}

/// Blocks until aborted, announcing when it starts. Clones share state, so
/// one copy can be registered while the test keeps another.
#[derive(Clone, Default)]
pub struct BlockingTool {
    state: Arc<BlockingState>,
}

#[derive(Default)]
struct BlockingState {
    started: Notify,
    released: Notify,
    aborts: AtomicUsize,
}

impl BlockingTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn wait_started(&self) {
        self.state.started.notified().await;
    }

    pub fn abort_count(&self) -> usize {
        self.state.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for BlockingTool {
    fn name(&self) -> &str {
        "simulate"
    }
    fn description(&self) -> &str {
        "Runs until aborted"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
        self.state.started.notify_one();
        self.state.released.notified().await;
        Err(ToolError::Aborted("simulation stopped".into()))
    }
    fn abort(&self) {
        self.state.aborts.fetch_add(1, Ordering::SeqCst);
        self.state.released.notify_one();
    }
}
