//! End-to-end scenarios for the agent core: tool round-trips, compaction,
//! transient retries and abort, driven through the public API only.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use socmate_agent::{
    ABORTED_BY_USER, Agent, AgentEvent, EventSink, RunOutcome, find_safe_boundary,
};
use socmate_config::AgentConfig;
use socmate_core::error::{ProviderError, ToolError};
use socmate_core::message::{Conversation, Message, ToolCall, pairing_violation};
use socmate_core::provider::{CompletionRequest, CompletionResponse, LlmClient, StreamEvent};
use socmate_core::tool::{Tool, ToolRegistry};
use tokio::sync::{Notify, mpsc};

// ── Mock client ──────────────────────────────────────────────────────────

/// Replays scripted completions and streams in order.
#[derive(Default)]
struct ScriptedClient {
    completions: Mutex<VecDeque<CompletionResponse>>,
    streams: Mutex<VecDeque<Vec<StreamEvent>>>,
    cancels: AtomicUsize,
}

impl ScriptedClient {
    fn completions(responses: Vec<CompletionResponse>) -> Self {
        let client = Self::default();
        client.completions.lock().unwrap().extend(responses);
        client
    }

    fn streams(scripts: Vec<Vec<StreamEvent>>) -> Self {
        let client = Self::default();
        client.streams.lock().unwrap().extend(scripts);
        client
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedClient {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let next = self.completions.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| panic!("ScriptedClient exhausted: no completion left")))
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedClient exhausted: no stream left"));
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

fn response(message: Message) -> CompletionResponse {
    CompletionResponse {
        message,
        usage: None,
        model: "mock".into(),
    }
}

fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::new(id, name, serde_json::to_string(&args).unwrap())
}

fn without_diagnostics(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if !matches!(
            event,
            AgentEvent::VerboseOutput { .. } | AgentEvent::Heartbeat { .. } | AgentEvent::TokenUsage { .. }
        ) {
            events.push(event);
        }
    }
    events
}

// ── Tools ────────────────────────────────────────────────────────────────

struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echo the msg argument"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {"msg": {"type": "string"}}})
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        Ok(arguments["msg"].as_str().unwrap_or_default().to_string())
    }
}

/// A long-running simulation that only stops when aborted.
#[derive(Clone, Default)]
struct SimulationTool {
    started: Arc<Notify>,
    released: Arc<Notify>,
    aborts: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Tool for SimulationTool {
    fn name(&self) -> &str {
        "simulate"
    }
    fn description(&self) -> &str {
        "Run the testbench"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
        self.started.notify_one();
        self.released.notified().await;
        Err(ToolError::Aborted("simulation stopped".into()))
    }
    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.released.notify_one();
    }
}

fn echo_registry() -> Arc<ToolRegistry> {
    let mut tools = ToolRegistry::new();
    tools.register(Box::new(EchoTool));
    Arc::new(tools)
}

fn tool_pairs(count: usize, output_chars: usize) -> Conversation {
    let mut conversation = Conversation::new();
    for i in 0..count {
        let id = format!("call_{i}");
        conversation.append(Message::assistant_tool_calls(vec![call(&id, "echo", json!({}))]));
        conversation.append_tool_response(&id, "x".repeat(output_chars));
    }
    conversation
}

fn pruning_config(minimum_savings: usize) -> AgentConfig {
    AgentConfig {
        max_context_tokens: 10_000,
        prune_threshold: 0.01,
        prune_protect_tokens: 100,
        prune_minimum_savings: minimum_savings,
        ..AgentConfig::default()
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn s1_happy_path_without_tools() {
    let client = Arc::new(ScriptedClient::completions(vec![response(Message::assistant("pong"))]));
    let mut agent = Agent::new(client, echo_registry(), AgentConfig::default());

    assert_eq!(agent.run("ping").await, "pong");
    assert_eq!(
        agent.conversation().messages(),
        &[Message::user("ping"), Message::assistant("pong")]
    );
}

#[tokio::test]
async fn s2_one_tool_round_trip() {
    let client = Arc::new(ScriptedClient::completions(vec![
        response(Message::assistant_tool_calls(vec![call("call_1", "echo", json!({"msg": "hi"}))])),
        response(Message::assistant("done")),
    ]));
    let (events, mut rx) = EventSink::channel();
    let mut agent = Agent::new(client, echo_registry(), AgentConfig::default()).with_events(events);

    assert_eq!(agent.run("please echo hi").await, "done");

    let messages = agent.conversation().messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0], Message::user("please echo hi"));
    assert_eq!(messages[1].tool_calls()[0].name, "echo");
    assert_eq!(messages[2], Message::tool_result("call_1", "hi"));
    assert_eq!(messages[3], Message::assistant("done"));

    assert_eq!(
        without_diagnostics(&mut rx),
        vec![
            AgentEvent::ToolCalled {
                name: "echo".into(),
                arguments: r#"{"msg":"hi"}"#.into()
            },
            AgentEvent::ToolResult {
                name: "echo".into(),
                result: "hi".into()
            },
            AgentEvent::RunComplete { content: "done".into() },
        ]
    );
}

#[tokio::test]
async fn s3_pruning_below_minimum_savings_is_a_no_op() {
    let conversation = tool_pairs(5, 400);
    let before = conversation.export_json().unwrap();
    let (events, mut rx) = EventSink::channel();
    let mut agent = Agent::new(Arc::new(ScriptedClient::default()), echo_registry(), pruning_config(999_999))
        .with_conversation(conversation)
        .with_events(events);

    assert_eq!(agent.compact().await, 0);
    assert_eq!(agent.conversation().export_json().unwrap(), before);
    assert!(
        !without_diagnostics(&mut rx)
            .iter()
            .any(|e| matches!(e, AgentEvent::Compacting { .. }))
    );
}

#[tokio::test]
async fn s4_pruning_rewrites_old_outputs() {
    let conversation = tool_pairs(5, 400);
    let original = conversation.snapshot();
    let (events, mut rx) = EventSink::channel();
    let mut agent = Agent::new(Arc::new(ScriptedClient::default()), echo_registry(), pruning_config(100))
        .with_conversation(conversation)
        .with_events(events);

    assert!(agent.compact().await > 0);

    let messages = agent.conversation().messages();
    let pruned = messages
        .iter()
        .filter(|m| m.content() == socmate_agent::compactor::PRUNED_PLACEHOLDER)
        .count();
    assert!(pruned >= 2, "only {pruned} outputs pruned");
    for (now, before) in messages.iter().zip(&original) {
        assert_eq!(now.tool_call_id(), before.tool_call_id());
    }
    assert!(pairing_violation(messages).is_none());
    assert!(
        without_diagnostics(&mut rx)
            .iter()
            .any(|e| matches!(e, AgentEvent::Compacting { layer: 1, .. }))
    );
}

#[test]
fn s5_safe_boundary_never_splits_a_group() {
    let messages = vec![
        Message::user("run lint"),
        Message::assistant_tool_calls(vec![call("c1", "echo", json!({}))]),
        Message::tool_result("c1", "clean"),
        Message::user("now synthesize"),
    ];
    for proposed in [1, 2] {
        assert_eq!(find_safe_boundary(&messages, proposed), 3, "proposed {proposed}");
    }
}

#[tokio::test]
async fn s6_transient_stream_failure_is_retried() {
    let client = Arc::new(ScriptedClient::streams(vec![
        vec![StreamEvent::Error {
            message: "connection reset".into(),
        }],
        vec![
            StreamEvent::Chunk { text: "pong".into() },
            StreamEvent::Done {
                message: Message::assistant("pong"),
                usage: None,
            },
        ],
    ]));
    let config = AgentConfig {
        retry_backoff_ms: 10,
        ..AgentConfig::default()
    };
    let max_retries = config.max_retries;
    let (events, mut rx) = EventSink::channel();
    let mut agent = Agent::new(client, echo_registry(), config).with_events(events);

    let outcome = agent.run_stream("ping").await;

    assert_eq!(outcome, RunOutcome::Complete("pong".into()));
    assert_eq!(
        without_diagnostics(&mut rx),
        vec![
            AgentEvent::Retrying {
                attempt: 1,
                max_attempts: max_retries,
                error: "connection reset".into()
            },
            AgentEvent::ContentChunk { text: "pong".into() },
            AgentEvent::RunComplete { content: "pong".into() },
        ]
    );
    assert_eq!(agent.handle().current_retry_count(), 0);
}

#[tokio::test]
async fn s7_abort_answers_every_pending_call() {
    let calls = vec![call("sim_1", "simulate", json!({})), call("sim_2", "simulate", json!({}))];
    let client = Arc::new(ScriptedClient::streams(vec![vec![
        StreamEvent::ToolCallDelta {
            index: 0,
            id: Some("sim_1".into()),
            name: Some("simulate".into()),
            arguments_delta: Some("{}".into()),
        },
        StreamEvent::ToolCallDelta {
            index: 1,
            id: Some("sim_2".into()),
            name: Some("simulate".into()),
            arguments_delta: Some("{}".into()),
        },
        StreamEvent::Done {
            message: Message::assistant_tool_calls(calls),
            usage: None,
        },
    ]]));
    let simulation = SimulationTool::default();
    let mut tools = ToolRegistry::new();
    tools.register(Box::new(simulation.clone()));

    let (events, mut rx) = EventSink::channel();
    let mut agent = Agent::new(client.clone(), Arc::new(tools), AgentConfig::default()).with_events(events);
    let handle = agent.handle();

    let started = simulation.started.clone();
    let (outcome, ()) = tokio::join!(agent.run_stream("simulate both corners"), async move {
        started.notified().await;
        handle.abort();
    });

    assert!(matches!(outcome, RunOutcome::Aborted(_)));
    assert_eq!(simulation.aborts.load(Ordering::SeqCst), 1);
    assert_eq!(client.cancels.load(Ordering::SeqCst), 1);

    let messages = agent.conversation().messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].tool_call_id(), Some("sim_1"));
    assert_eq!(messages[3], Message::tool_result("sim_2", ABORTED_BY_USER));
    assert!(pairing_violation(messages).is_none());

    let events = without_diagnostics(&mut rx);
    assert!(matches!(events.last(), Some(AgentEvent::RunAborted { .. })));
    assert!(!agent.handle().is_running());
}
