//! OpenAI-compatible chat completion client.
//!
//! Sends chat completion requests to the configured provider and streams back
//! tokens and native tool calls. When a model is unavailable the request is
//! retried against each entry of `llm.fallback_models` in order.

use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use reqwest::Client as HttpClient;

use super::errors::InferenceError;
use super::streaming::{parse_non_streaming_response, parse_sse_stream};
use super::types::{ChatCompletionRequest, ChatMessage, StreamChunk, ToolDefinition, WireMessage};
use crate::config::LlmConfig;
use crate::upstream::UpstreamError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Provider label used in upstream errors and logs.
const PROVIDER: &str = "llm";

/// Chunks of one streamed completion.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, InferenceError>>;

// ─── ChatClient ──────────────────────────────────────────────────────────────

/// Client for the chat completion endpoint.
///
/// Stateless across requests: every call walks the model chain from the
/// primary model, so one client can be shared by all sessions.
#[derive(Clone)]
pub struct ChatClient {
    /// HTTP client for non-streaming requests.
    http: HttpClient,
    /// HTTP client for streaming requests (longer total timeout).
    http_stream: HttpClient,
    config: LlmConfig,
}

impl ChatClient {
    pub fn from_config(config: LlmConfig) -> Result<Self, InferenceError> {
        let http = build_http(Duration::from_secs(config.request_timeout_secs), &config)?;
        let http_stream = build_http(Duration::from_secs(config.stream_timeout_secs), &config)?;
        Ok(Self {
            http,
            http_stream,
            config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Tokens available for the prompt once the reply is reserved.
    pub fn prompt_budget(&self) -> u32 {
        self.config
            .context_window
            .saturating_sub(self.config.max_tokens)
            .max(self.config.context_window / 4)
    }

    /// Primary model followed by the fallback chain, without duplicates.
    fn model_chain(&self) -> Vec<&str> {
        let mut chain = vec![self.config.model.as_str()];
        for m in &self.config.fallback_models {
            if !chain.contains(&m.as_str()) {
                chain.push(m);
            }
        }
        chain
    }

    fn build_request(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        stream: bool,
    ) -> ChatCompletionRequest {
        let tools = tools.filter(|t| !t.is_empty()).map(<[_]>::to_vec);
        ChatCompletionRequest {
            model: model.to_string(),
            messages: messages.iter().map(WireMessage::from).collect(),
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream,
        }
    }

    fn post(&self, client: &HttpClient, body: &ChatCompletionRequest) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", self.config.base_url);
        let mut req = client.post(url).json(body);
        if !self.config.api_key.is_empty() {
            req = req.bearer_auth(&self.config.api_key);
        }
        req
    }

    // ─── Chat Completion (streaming) ─────────────────────────────────────

    /// Send a streaming chat completion request.
    ///
    /// Returns a stream of `StreamChunk`s once a model in the chain accepts
    /// the request. Errors after the first byte are surfaced in the stream
    /// and do not trigger a fallback.
    pub async fn chat_completion_stream(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChunkStream, InferenceError> {
        let timeout = Duration::from_secs(self.config.stream_timeout_secs);
        let mut attempted = Vec::new();
        let mut last_error: Option<InferenceError> = None;

        for model in self.model_chain() {
            let body = self.build_request(model, messages, tools, true);
            log_request(&body);

            let result: Result<_, InferenceError> = async {
                let response = self
                    .post(&self.http_stream, &body)
                    .header("Accept", "text/event-stream")
                    .send()
                    .await
                    .map_err(|e| UpstreamError::from_reqwest(PROVIDER, &e, timeout))?;
                check_status(response).await
            }
            .await;

            match result {
                Ok(response) => return Ok(parse_sse_stream(response).boxed()),
                Err(e) if e.is_retriable() => {
                    tracing::warn!(model = %model, error = %e, "model unavailable, trying next");
                    attempted.push(model.to_string());
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(exhausted(attempted, last_error))
    }

    // ─── Chat Completion (non-streaming) ─────────────────────────────────

    /// Send a non-streaming chat completion request.
    ///
    /// Returns a single `StreamChunk` with the complete response.
    pub async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<StreamChunk, InferenceError> {
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let mut attempted = Vec::new();
        let mut last_error: Option<InferenceError> = None;

        for model in self.model_chain() {
            let body = self.build_request(model, messages, tools, false);
            log_request(&body);

            let result: Result<_, InferenceError> = async {
                let response = self
                    .post(&self.http, &body)
                    .send()
                    .await
                    .map_err(|e| UpstreamError::from_reqwest(PROVIDER, &e, timeout))?;
                let response = check_status(response).await?;
                let text = response
                    .text()
                    .await
                    .map_err(|e| UpstreamError::from_reqwest(PROVIDER, &e, timeout))?;
                parse_non_streaming_response(&text)
            }
            .await;

            match result {
                Ok(chunk) => return Ok(chunk),
                Err(e) if e.is_retriable() => {
                    tracing::warn!(model = %model, error = %e, "model unavailable, trying next");
                    attempted.push(model.to_string());
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(exhausted(attempted, last_error))
    }

    // ─── Health Check ────────────────────────────────────────────────────

    /// Whether the provider answers `GET /models`. Consumes no tokens.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.config.base_url);
        let mut req = self.http.get(&url).timeout(CONNECT_TIMEOUT);
        if !self.config.api_key.is_empty() {
            req = req.bearer_auth(&self.config.api_key);
        }
        match req.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "llm health check failed");
                false
            }
        }
    }
}

fn build_http(total: Duration, config: &LlmConfig) -> Result<HttpClient, InferenceError> {
    HttpClient::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(total)
        .build()
        .map_err(|e| {
            InferenceError::Upstream(UpstreamError::Connection {
                provider: PROVIDER.into(),
                reason: format!("failed to build HTTP client for {}: {e}", config.base_url),
            })
        })
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(UpstreamError::from_status(PROVIDER, status.as_u16(), &body).into())
}

/// With a single model the underlying error is more useful than a summary.
fn exhausted(attempted: Vec<String>, last_error: Option<InferenceError>) -> InferenceError {
    match last_error {
        Some(e) if attempted.len() <= 1 => e,
        _ => InferenceError::AllModelsUnavailable { attempted },
    }
}

/// Log request metadata, not the body.
fn log_request(body: &ChatCompletionRequest) {
    tracing::info!(
        model = %body.model,
        message_count = body.messages.len(),
        tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
        max_tokens = body.max_tokens,
        stream = body.stream,
        "llm request"
    );
}

// ─── Tests ───────────────────────────────────────────────────────────────────
