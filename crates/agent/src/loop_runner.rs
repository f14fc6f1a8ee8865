//! The agent reasoning loop implementation.

use socmate_config::AgentConfig;
use socmate_core::error::{ProviderError, is_transient_message};
use socmate_core::message::{Conversation, Message, ToolCall};
use socmate_core::provider::{CompletionRequest, LlmClient, StreamEvent, Usage};
use socmate_core::token::{estimate_message_tokens, estimate_tools_tokens};
use socmate_core::tool::{ToolDefinition, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compactor::{CONTINUE_AFTER_COMPACTION, Compactor};
use crate::event::{AgentEvent, EventSink};
use crate::supervisor::{AgentHandle, Supervisor, spawn_heartbeat};

/// Tool response recorded for every call the user cut short.
pub const ABORTED_BY_USER: &str = "Aborted by user";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The model produced a tool-free answer.
    Complete(String),
    /// `abort()` was observed; carries the content of the interrupted turn.
    Aborted(String),
    /// Unrecoverable: semantic model error, exhausted retries, safety limit.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Blocking,
    Streaming,
}

struct Turn {
    message: Message,
    usage: Option<Usage>,
}

enum TurnError {
    Aborted,
    Failed { message: String, transient: bool },
}

impl TurnError {
    fn stream(message: String) -> Self {
        Self::Failed {
            transient: is_transient_message(&message),
            message,
        }
    }
}

impl From<ProviderError> for TurnError {
    fn from(e: ProviderError) -> Self {
        Self::Failed {
            transient: e.is_transient(),
            message: e.to_string(),
        }
    }
}

/// The agent: one conversation, one model, one tool registry.
///
/// `run` and `run_stream` take `&mut self`, so a conversation is driven by
/// exactly one task; use [`Agent::handle`] to abort or inject messages from
/// elsewhere.
pub struct Agent {
    /// The model transport
    client: Arc<dyn LlmClient>,

    /// Tool registry
    tools: Arc<ToolRegistry>,

    /// Loop, compaction and supervision settings
    config: AgentConfig,

    compactor: Compactor,

    /// The history this agent owns
    conversation: Conversation,

    /// Shared with every `AgentHandle`
    supervisor: Arc<Supervisor>,

    /// Where progress goes
    events: EventSink,
}

impl Agent {
    /// Create a new agent with an empty conversation and no event observer.
    pub fn new(client: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        let supervisor = Arc::new(Supervisor::new(client.clone(), tools.clone()));
        Self {
            client,
            tools,
            compactor: Compactor::new(config.clone()),
            config,
            conversation: Conversation::new(),
            supervisor,
            events: EventSink::disabled(),
        }
    }

    /// Deliver events to `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Prepend `prompt` to every request.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.conversation.set_system_prompt(Some(prompt.into()));
        self
    }

    /// Continue an existing conversation.
    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = conversation;
        self
    }

    /// A handle for aborting or injecting from another task.
    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            supervisor: self.supervisor.clone(),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Forget the history; the system prompt stays.
    pub fn reset(&mut self) {
        self.conversation.clear();
    }

    /// Compact the conversation now. Returns the estimated tokens saved.
    pub async fn compact(&mut self) -> usize {
        self.compact_until(&CancellationToken::new()).await
    }

    async fn compact_until(&mut self, cancel: &CancellationToken) -> usize {
        self.compactor
            .compact(&mut self.conversation, self.client.as_ref(), &self.events, cancel)
            .await
    }

    /// Process `query` with blocking completions.
    ///
    /// Returns the final assistant content. A failed run returns an
    /// `Error: ...` diagnostic and an aborted one whatever partial content
    /// exists (or `Aborted by user`). The matching terminal event is emitted
    /// either way.
    pub async fn run(&mut self, query: impl Into<String>) -> String {
        match self.execute(query.into(), Mode::Blocking).await {
            RunOutcome::Complete(content) => content,
            RunOutcome::Aborted(partial) if partial.is_empty() => ABORTED_BY_USER.to_string(),
            RunOutcome::Aborted(partial) => partial,
            RunOutcome::Failed(message) => format!("Error: {message}"),
        }
    }

    /// Process `query` with streaming completions.
    ///
    /// Progress is reported through the event sink while the run is in
    /// flight: content and reasoning chunks, tool activity, heartbeats and
    /// exactly one terminal event.
    pub async fn run_stream(&mut self, query: impl Into<String>) -> RunOutcome {
        self.execute(query.into(), Mode::Streaming).await
    }

    async fn execute(&mut self, query: String, mode: Mode) -> RunOutcome {
        let cancel = self.supervisor.begin_run();
        info!(
            conversation_id = %self.conversation.id,
            messages = self.conversation.len(),
            streaming = mode == Mode::Streaming,
            "Processing request"
        );

        self.conversation.append(Message::user(query));

        let heartbeat = (mode == Mode::Streaming).then(|| {
            let stop = CancellationToken::new();
            spawn_heartbeat(self.supervisor.clone(), &self.config, self.events.clone(), stop.clone());
            stop.drop_guard()
        });

        let outcome = self.drive(mode, &cancel).await;
        drop(heartbeat);
        self.supervisor.end_run();

        match &outcome {
            RunOutcome::Complete(content) => {
                info!(
                    conversation_id = %self.conversation.id,
                    iterations = self.supervisor.iteration(),
                    "Run complete"
                );
                self.events.emit(AgentEvent::RunComplete {
                    content: content.clone(),
                });
            }
            RunOutcome::Aborted(partial) => {
                info!(conversation_id = %self.conversation.id, "Run aborted");
                self.events.emit(AgentEvent::RunAborted {
                    partial_content: partial.clone(),
                });
            }
            RunOutcome::Failed(message) => {
                warn!(conversation_id = %self.conversation.id, error = %message, "Run failed");
                self.events.emit(AgentEvent::RunError {
                    message: message.clone(),
                });
            }
        }
        outcome
    }

    async fn drive(&mut self, mode: Mode, cancel: &CancellationToken) -> RunOutcome {
        let tool_definitions = self.tools.definitions();
        let schema_tokens = estimate_tools_tokens(&tool_definitions);
        let mut partial = String::new();

        loop {
            if self.supervisor.is_aborted() {
                return RunOutcome::Aborted(partial);
            }
            self.inject_queued();

            let iteration = self.supervisor.next_iteration();
            if iteration > self.config.max_iterations {
                warn!(
                    conversation_id = %self.conversation.id,
                    max_iterations = self.config.max_iterations,
                    "Max iterations reached without a final answer"
                );
                return RunOutcome::Failed(format!(
                    "Reached the safety limit of {} iterations without a final answer",
                    self.config.max_iterations
                ));
            }

            let saved = self.compact_until(cancel).await;
            if self.supervisor.is_aborted() {
                return RunOutcome::Aborted(partial);
            }
            if saved > 0 && mode == Mode::Streaming && iteration > 1 {
                self.conversation.append(Message::user(CONTINUE_AFTER_COMPACTION));
            }

            debug!(
                conversation_id = %self.conversation.id,
                iteration,
                messages = self.conversation.len(),
                tokens = self.conversation.estimated_tokens(),
                "Agent loop iteration"
            );
            self.events.verbose(format!(
                "Iteration {iteration}: {} messages, ~{} tokens",
                self.conversation.len(),
                self.conversation.estimated_tokens()
            ));

            let turn = loop {
                if self.supervisor.is_aborted() {
                    return RunOutcome::Aborted(partial);
                }
                partial.clear();

                let result = match mode {
                    Mode::Blocking => self.complete_turn(&tool_definitions, cancel).await,
                    Mode::Streaming => self.stream_turn(&tool_definitions, cancel, &mut partial).await,
                };
                match result {
                    Ok(turn) => break turn,
                    Err(TurnError::Aborted) => return RunOutcome::Aborted(partial),
                    Err(TurnError::Failed { message, transient }) => {
                        if self.supervisor.is_aborted() {
                            return RunOutcome::Aborted(partial);
                        }
                        if !transient {
                            return RunOutcome::Failed(message);
                        }
                        let attempt = self.supervisor.bump_retry();
                        if attempt > self.config.max_retries {
                            return RunOutcome::Failed(format!(
                                "{message} (gave up after {} retries)",
                                self.config.max_retries
                            ));
                        }
                        warn!(
                            attempt,
                            max_attempts = self.config.max_retries,
                            error = %message,
                            "Transient model failure, retrying"
                        );
                        self.events.emit(AgentEvent::Retrying {
                            attempt,
                            max_attempts: self.config.max_retries,
                            error: message,
                        });

                        let backoff = Duration::from_millis(self.config.retry_backoff_ms * attempt as u64);
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = cancel.cancelled() => return RunOutcome::Aborted(partial),
                        }
                    }
                }
            };
            self.supervisor.reset_retries();
            self.record_usage(&turn, schema_tokens);

            let message = turn.message;
            if message.has_tool_calls() {
                let calls = message.tool_calls().to_vec();
                partial = message.content().to_string();
                debug!(tool_count = calls.len(), "Executing tool calls");
                self.conversation.append(message);

                if !self.dispatch_tools(&calls, cancel).await {
                    return RunOutcome::Aborted(partial);
                }
                continue;
            }

            let content = message.content().to_string();
            self.conversation.append(message);
            if self.supervisor.has_queued() {
                partial = content;
                continue;
            }
            return RunOutcome::Complete(content);
        }
    }

    /// Answer every call in order. Returns `false` if the run was aborted;
    /// every call still gets a response.
    async fn dispatch_tools(&mut self, calls: &[ToolCall], cancel: &CancellationToken) -> bool {
        for (i, call) in calls.iter().enumerate() {
            if self.supervisor.is_aborted() {
                for skipped in &calls[i..] {
                    self.conversation.append_tool_response(&skipped.id, ABORTED_BY_USER);
                }
                info!(skipped = calls.len() - i, "Answered pending tool calls after abort");
                return false;
            }

            self.supervisor.mark_progress();
            self.events.emit(AgentEvent::ToolCalled {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });

            let result = tokio::select! {
                result = self.tools.dispatch(call) => result,
                _ = cancel.cancelled() => ABORTED_BY_USER.to_string(),
            };

            self.supervisor.mark_progress();
            self.events.emit(AgentEvent::ToolResult {
                name: call.name.clone(),
                result: result.clone(),
            });
            self.conversation.append_tool_response(&call.id, result);
        }
        !self.supervisor.is_aborted()
    }

    fn inject_queued(&mut self) {
        while let Some((text, remaining)) = self.supervisor.pop_request() {
            debug!(remaining, "Injecting queued request");
            self.events.emit(AgentEvent::ProcessingQueuedRequest {
                text: text.clone(),
                remaining,
            });
            self.conversation.append(Message::user(text));
        }
    }

    fn request(&self, tool_definitions: &[ToolDefinition]) -> CompletionRequest {
        CompletionRequest::new(
            self.conversation.build_prompt(),
            tool_definitions.to_vec(),
            self.config.temperature,
        )
    }

    async fn complete_turn(
        &self,
        tool_definitions: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<Turn, TurnError> {
        let request = self.request(tool_definitions);
        let response = tokio::select! {
            result = self.client.complete(request) => result?,
            _ = cancel.cancelled() => return Err(TurnError::Aborted),
        };
        self.supervisor.mark_progress();
        Ok(Turn {
            message: response.message,
            usage: response.usage,
        })
    }

    async fn stream_turn(
        &self,
        tool_definitions: &[ToolDefinition],
        cancel: &CancellationToken,
        partial: &mut String,
    ) -> Result<Turn, TurnError> {
        let request = self.request(tool_definitions).streaming();
        let mut rx = tokio::select! {
            result = self.client.stream(request) => result?,
            _ = cancel.cancelled() => return Err(TurnError::Aborted),
        };

        loop {
            let event = tokio::select! {
                event = rx.recv() => event,
                _ = cancel.cancelled() => return Err(TurnError::Aborted),
            };
            match event {
                Some(StreamEvent::Chunk { text }) => {
                    self.supervisor.mark_progress();
                    partial.push_str(&text);
                    self.events.emit(AgentEvent::ContentChunk { text });
                }
                Some(StreamEvent::Reasoning { text }) => {
                    self.supervisor.mark_progress();
                    self.events.emit(AgentEvent::ReasoningChunk { text });
                }
                Some(StreamEvent::ToolCallDelta { .. }) => self.supervisor.mark_progress(),
                Some(StreamEvent::Done { message, usage }) => return Ok(Turn { message, usage }),
                Some(StreamEvent::Error { message }) => return Err(TurnError::stream(message)),
                None => {
                    return Err(TurnError::stream(
                        "Connection closed before the stream completed".into(),
                    ));
                }
            }
        }
    }

    /// Count provider-reported usage, or estimate it when the provider sent
    /// none: the prompt plus the tool schemas in, the assistant turn out.
    fn record_usage(&self, turn: &Turn, schema_tokens: usize) {
        match turn.usage {
            Some(usage) => self.supervisor.record_usage(usage),
            None => self.supervisor.record_estimated_usage(
                self.conversation.estimated_tokens() + schema_tokens,
                estimate_message_tokens(&turn.message),
            ),
        }
    }
}
