//! Context compaction.
//!
//! Two layers, applied in order and gated independently on the estimated
//! token count of the conversation:
//!
//! 1. **Tool-output pruning** replaces old, large tool results with a short
//!    placeholder. Pure; see [`prune_tool_outputs`].
//! 2. **Prefix summarisation** replaces everything before a safe cut with a
//!    single summary message, produced by the model when possible and
//!    mechanically otherwise.
//!
//! Neither layer ever separates an assistant turn from its tool responses.

use socmate_config::AgentConfig;
use socmate_core::message::{Conversation, Message, SUMMARY_MARKER};
use socmate_core::provider::{CompletionRequest, LlmClient};
use socmate_core::token::estimate_message_tokens;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::event::{AgentEvent, EventSink};

/// Replacement content for pruned tool outputs.
pub const PRUNED_PLACEHOLDER: &str = "[output pruned]";

/// Tool messages estimated above this are worth pruning.
pub const LARGE_TOOL_OUTPUT_TOKENS: usize = 100;

/// Tool results are cut to this many characters in summary transcripts.
pub const TRANSCRIPT_TOOL_CHARS: usize = 500;

/// Characters of each message kept by the mechanical summary.
pub const MECHANICAL_PREVIEW_CHARS: usize = 100;

/// Appended after a mid-run compaction so the model has a turn to answer.
pub const CONTINUE_AFTER_COMPACTION: &str = "[System: Context compacted. Continue your current task.]";

const SUMMARY_INSTRUCTIONS: &str = "You are compacting the history of a long-running SoC design session so work can continue in a fresh context window. Summarise the transcript below using exactly these sections:

## Task Overview
## Current State
## Key Files and Paths
## Decisions Made
## Important Context
## Next Steps

Be specific: keep file paths, module and signal names, commands, error messages and numbers verbatim. Output only the summary.";

/// Result of a successful pruning pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PruneOutcome {
    pub messages: Vec<Message>,
    pub pruned: usize,
    pub tokens_saved: usize,
}

/// Layer 1: prune old tool outputs.
///
/// Tool messages are counted from the newest backwards; once their running
/// total reaches `protect_tokens`, that message and everything after it are
/// protected. Older tool messages estimated above
/// [`LARGE_TOOL_OUTPUT_TOKENS`] get [`PRUNED_PLACEHOLDER`] as content.
/// Returns `None` when the savings would stay below `minimum_savings`.
pub fn prune_tool_outputs(
    messages: &[Message],
    protect_tokens: usize,
    minimum_savings: usize,
) -> Option<PruneOutcome> {
    let mut protected_from = 0;
    let mut accumulated = 0;
    for (i, message) in messages.iter().enumerate().rev() {
        if message.is_tool() {
            accumulated += estimate_message_tokens(message);
            if accumulated >= protect_tokens {
                protected_from = i;
                break;
            }
        }
    }

    let placeholder_tokens = estimate_message_tokens(&Message::tool_result("", PRUNED_PLACEHOLDER));
    let selected: Vec<(usize, usize)> = messages[..protected_from]
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_tool() && m.content() != PRUNED_PLACEHOLDER)
        .map(|(i, m)| (i, estimate_message_tokens(m)))
        .filter(|&(_, tokens)| tokens > LARGE_TOOL_OUTPUT_TOKENS)
        .collect();

    let tokens_saved: usize = selected
        .iter()
        .map(|&(_, tokens)| tokens.saturating_sub(placeholder_tokens))
        .sum();
    if selected.is_empty() || tokens_saved < minimum_savings {
        return None;
    }

    let mut pruned = messages.to_vec();
    for &(i, _) in &selected {
        if let Message::Tool { content, .. } = &mut pruned[i] {
            *content = PRUNED_PLACEHOLDER.to_string();
        }
    }

    Some(PruneOutcome {
        messages: pruned,
        pruned: selected.len(),
        tokens_saved,
    })
}

/// Move a proposed cut so that it never splits a tool-call group.
///
/// A cut landing on an assistant turn with tool calls, or on one of its tool
/// responses, moves forward past the whole group. `M[..b]` then holds only
/// complete groups and `M[b..]` starts with a non-tool message (or is empty).
pub fn find_safe_boundary(messages: &[Message], proposed: usize) -> usize {
    let mut boundary = proposed.min(messages.len());
    if boundary == 0 {
        return 0;
    }

    if messages.get(boundary).is_some_and(Message::has_tool_calls) {
        boundary += 1;
    }
    while messages.get(boundary).is_some_and(Message::is_tool) {
        boundary += 1;
    }
    boundary
}

fn truncate_chars(text: &str, max_chars: usize) -> Option<&str> {
    text.char_indices().nth(max_chars).map(|(cut, _)| &text[..cut])
}

/// Render messages as a plain-text transcript for the summariser.
pub fn render_transcript(messages: &[Message]) -> String {
    let mut lines = Vec::with_capacity(messages.len());
    for message in messages {
        match message {
            Message::System { content } => lines.push(format!("[system] {content}")),
            Message::User { content } => lines.push(format!("[user] {content}")),
            Message::Assistant { tool_calls, .. } => {
                if !message.content().is_empty() {
                    lines.push(format!("[assistant] {}", message.content()));
                }
                if !tool_calls.is_empty() {
                    let names: Vec<&str> = tool_calls.iter().map(|c| c.name.as_str()).collect();
                    lines.push(format!("[Assistant called tools: {}]", names.join(" ")));
                }
            }
            Message::Tool { content, .. } => {
                let shown = match truncate_chars(content, TRANSCRIPT_TOOL_CHARS) {
                    Some(head) => format!("{head}... (truncated)"),
                    None => content.clone(),
                };
                lines.push(format!("[Tool result: {shown}]"));
            }
        }
    }
    lines.join("\n")
}

/// Fallback summary used when the model cannot be asked.
pub fn mechanical_summary(messages: &[Message]) -> String {
    let mut summary = String::from("[Previous conversation summary: ");
    for message in messages {
        let text = match message {
            Message::Assistant { tool_calls, .. } if message.content().is_empty() && !tool_calls.is_empty() => {
                let names: Vec<&str> = tool_calls.iter().map(|c| c.name.as_str()).collect();
                format!("called {}", names.join(", "))
            }
            _ => message.content().to_string(),
        };
        let preview = match truncate_chars(&text, MECHANICAL_PREVIEW_CHARS) {
            Some(head) => format!("{head}..."),
            None => text.clone(),
        };
        summary.push_str(&format!("{}: {preview}; ", message.role().as_str()));
    }
    summary.push(']');
    summary
}

/// Applies both compaction layers to a conversation.
#[derive(Debug, Clone)]
pub struct Compactor {
    config: AgentConfig,
}

impl Compactor {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Whether the first layer's threshold is exceeded.
    pub fn needs_compaction(&self, conversation: &Conversation) -> bool {
        conversation.estimated_tokens() > self.config.prune_trigger_tokens()
    }

    /// Run the compaction layers whose thresholds are exceeded.
    ///
    /// Returns the number of estimated tokens saved; 0 when nothing fired.
    /// Once `cancel` fires the summary request is dropped and the history
    /// keeps whatever the first layer produced.
    pub async fn compact(
        &self,
        conversation: &mut Conversation,
        client: &dyn LlmClient,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> usize {
        let initial = conversation.estimated_tokens();

        if initial > self.config.prune_trigger_tokens() {
            match prune_tool_outputs(
                conversation.messages(),
                self.config.prune_protect_tokens,
                self.config.prune_minimum_savings,
            ) {
                Some(outcome) => {
                    conversation.replace(outcome.messages);
                    let after = conversation.estimated_tokens();
                    info!(
                        conversation_id = %conversation.id,
                        pruned = outcome.pruned,
                        tokens_before = initial,
                        tokens_after = after,
                        "Pruned old tool outputs"
                    );
                    events.verbose(format!(
                        "Pruned {} tool output(s): {initial} -> {after} tokens",
                        outcome.pruned
                    ));
                    events.emit(AgentEvent::Compacting {
                        layer: 1,
                        before_tokens: initial,
                        after_tokens: after,
                    });
                }
                None => events.verbose("Tool-output pruning skipped: savings below minimum"),
            }
        }

        let before = conversation.estimated_tokens();
        let keep = self.config.keep_recent_messages;
        if before > self.config.compact_trigger_tokens() && conversation.len() > keep {
            let boundary = find_safe_boundary(conversation.messages(), conversation.len() - keep);
            if boundary > 0 {
                let messages = conversation.snapshot();
                let Some(summary) = self.summarize(&messages[..boundary], client, events, cancel).await else {
                    info!(conversation_id = %conversation.id, "Summarisation cancelled");
                    events.verbose("Summarisation cancelled; history left as is");
                    return initial.saturating_sub(conversation.estimated_tokens());
                };

                let mut compacted = Vec::with_capacity(messages.len() - boundary + 1);
                compacted.push(Message::user(format!("{SUMMARY_MARKER}\n{summary}")));
                compacted.extend_from_slice(&messages[boundary..]);
                conversation.replace(compacted);

                let after = conversation.estimated_tokens();
                info!(
                    conversation_id = %conversation.id,
                    summarized = boundary,
                    tokens_before = before,
                    tokens_after = after,
                    "Summarised conversation prefix"
                );
                events.verbose(format!(
                    "Summarised {boundary} message(s): {before} -> {after} tokens"
                ));
                events.emit(AgentEvent::Compacting {
                    layer: 2,
                    before_tokens: before,
                    after_tokens: after,
                });
            }
        }

        initial.saturating_sub(conversation.estimated_tokens())
    }

    /// Summarise `messages`, asking the model first.
    ///
    /// `None` when `cancel` fired before the model answered.
    pub async fn summarize(
        &self,
        messages: &[Message],
        client: &dyn LlmClient,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let prompt = format!(
            "{SUMMARY_INSTRUCTIONS}\n\n<transcript>\n{}\n</transcript>",
            render_transcript(messages)
        );
        let request = CompletionRequest::new(vec![Message::user(prompt)], vec![], self.config.summary_temperature);

        let result = tokio::select! {
            result = client.complete(request) => result,
            _ = cancel.cancelled() => return None,
        };
        let summary = match result {
            Ok(response) if !response.message.content().trim().is_empty() => {
                response.message.content().trim().to_string()
            }
            Ok(_) => {
                warn!("Summary request returned no content, using mechanical summary");
                events.verbose("Summary was empty; fell back to mechanical summary");
                mechanical_summary(messages)
            }
            Err(e) => {
                warn!(error = %e, "Summary request failed, using mechanical summary");
                events.verbose(format!("Summary request failed ({e}); fell back to mechanical summary"));
                mechanical_summary(messages)
            }
        };
        Some(summary)
    }
}
