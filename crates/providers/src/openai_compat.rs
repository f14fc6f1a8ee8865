//! OpenAI-compatible chat-completions client.
//!
//! Works with OpenAI, DeepSeek, OpenRouter, Ollama, vLLM and any endpoint
//! exposing `/chat/completions`. Supports blocking and streaming (SSE)
//! requests, tool calling and `response_format` passthrough.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use socmate_config::AppConfig;
use socmate_core::error::ProviderError;
use socmate_core::message::Message;
use socmate_core::provider::*;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::sse::{ApiUsage, StreamAssembler, error_message};

/// An OpenAI-compatible LLM client.
pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
    /// Token of the most recent stream; cancelling it stops the reader task.
    in_flight: Mutex<CancellationToken>,
}

impl OpenAiCompatClient {
    /// Create a new client.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            client,
            in_flight: Mutex::new(CancellationToken::new()),
        })
    }

    /// Build a client from the application configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        Self::new(
            "openai-compat",
            config.api_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(request.tools);
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if let Some(format) = &request.response_format {
            body["response_format"] = serde_json::json!(format);
        }

        body
    }

    async fn post(&self, body: &serde_json::Value, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        check_status(response).await
    }

    /// Swap in a fresh cancellation token for a new stream.
    fn begin_stream(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        *slot = token.clone();
        token
    }
}

fn map_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if !response.status().is_success() {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

/// Turn a decoded chat-completions body into a response.
fn parse_response(api_response: ApiResponse) -> Result<CompletionResponse, ProviderError> {
    if let Some(error) = api_response.error {
        return Err(ProviderError::Model(error_message(&error)));
    }

    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

    if !matches!(choice.message, Message::Assistant { .. }) {
        return Err(ProviderError::InvalidResponse(format!(
            "Expected an assistant message, got role '{}'",
            choice.message.role().as_str()
        )));
    }

    Ok(CompletionResponse {
        message: choice.message,
        usage: api_response.usage.map(Into::into),
        model: api_response.model,
    })
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let body = self.request_body(&request, false);
        debug!(client = %self.name, model = %self.model, messages = request.messages.len(), "Sending completion request");

        let response = self.post(&body, false).await?;
        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        parse_response(api_response)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let body = self.request_body(&request, true);
        debug!(client = %self.name, model = %self.model, messages = request.messages.len(), "Sending streaming request");

        let token = self.begin_stream();
        let response = tokio::select! {
            _ = token.cancelled() => {
                return Err(ProviderError::StreamInterrupted("Stream cancelled".into()));
            }
            response = self.post(&body, true) => response?,
        };

        let (tx, rx) = mpsc::channel(64);

        // Reader task: bytes -> lines -> assembler -> events.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut assembler = StreamAssembler::with_usage_trailer();

            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => {
                        let _ = tx.send(StreamEvent::Error { message: "Stream cancelled".into() }).await;
                        return;
                    }
                    next = byte_stream.next() => next,
                };

                let bytes = match next {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        let message = map_transport_error(e).to_string();
                        let _ = tx.send(StreamEvent::Error { message }).await;
                        return;
                    }
                    None => break,
                };

                buffer.extend_from_slice(&bytes);
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);

                    for event in assembler.push_line(&line) {
                        if tx.send(event).await.is_err() {
                            return; // receiver dropped
                        }
                    }
                    if assembler.is_finished() {
                        return;
                    }
                }
            }

            if !buffer.is_empty() {
                let line = String::from_utf8_lossy(&buffer).into_owned();
                for event in assembler.push_line(&line) {
                    let _ = tx.send(event).await;
                }
            }
            if let Some(event) = assembler.finish() {
                let _ = tx.send(event).await;
            }
        });

        Ok(rx)
    }

    fn cancel(&self) {
        let token = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        token.cancel();
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: Message,
}
