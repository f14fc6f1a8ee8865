//! Error types for the socmate domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all socmate operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Conversation structure ---
    #[error("Invalid conversation: {0}")]
    InvalidConversation(String),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures talking to the language model.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    /// The model answered with an `error` field instead of choices.
    #[error("Model returned an error: {0}")]
    Model(String),

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether the agent may resubmit the same request after this failure.
    ///
    /// Semantic model errors are never transient, whatever their wording.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Model(_) => false,
            other => is_transient_message(&other.to_string()),
        }
    }
}

/// Classify a transport failure message: anything mentioning a timeout,
/// the network, or a connection is worth another attempt.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["timeout", "network", "connection"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Failures raised by tools. These never reach the caller of the agent:
/// the registry renders them as `Error: ...` tool responses for the model.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name} — {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid JSON arguments - {0}")]
    InvalidJson(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool aborted: {0}")]
    Aborted(String),
}
