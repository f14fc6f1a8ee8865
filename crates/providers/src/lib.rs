//! Model transports for socmate.
//!
//! All clients implement the `socmate_core::LlmClient` trait. The SSE
//! assembler is exposed separately so other transports can reuse it.

pub mod openai_compat;
pub mod sse;

pub use openai_compat::OpenAiCompatClient;
pub use sse::StreamAssembler;
