//! # socmate core
//!
//! Domain types, traits, and error definitions for the socmate SoC-design
//! agent. This crate does no I/O of its own; it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping model transports via configuration
//! - Easy testing with scripted clients and stub tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod token;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{Conversation, ConversationId, Message, Role, ToolCall, SUMMARY_MARKER};
pub use provider::{CompletionRequest, CompletionResponse, LlmClient, StreamEvent, Usage};
pub use tool::{Tool, ToolDefinition, ToolRegistry};
