//! The socmate agent loop.
//!
//! The agent follows a **prompt → model → tools** cycle:
//!
//! 1. **Append** the user query (and any queued injections)
//! 2. **Compact** the history when it nears the context window
//! 3. **Send to the model**, blocking or streaming
//! 4. **If tool calls**: dispatch them in order, append the results, loop
//! 5. **If text**: that is the answer
//!
//! A [`Supervisor`](supervisor) tracks progress while a run is in flight:
//! heartbeats, stuck detection, transient-error retries, the injection
//! queue and abort. Everything observable goes through one [`AgentEvent`]
//! stream.

pub mod compactor;
pub mod event;
pub mod loop_runner;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use compactor::{Compactor, find_safe_boundary, prune_tool_outputs};
pub use event::{AgentEvent, EventSink};
pub use loop_runner::{ABORTED_BY_USER, Agent, RunOutcome};
pub use supervisor::{AgentHandle, STATUS_CHECK_PROMPT};
