//! Single-request execution and metric extraction.

use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{Config, Mode};
use crate::error::RequestError;
use crate::http_client::Transport;
use crate::metrics::RequestResult;
use crate::models::openai::{
    ChatCompletionRequest, ChatMessage, EmbeddingRequest, RequestPayload, Usage, UsageEnvelope,
};

/// Token counts attributed to one successful request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCounts {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
    /// True when the counts are a word-count approximation, not server data
    pub estimated: bool,
}

/// Sends one request per call and turns every outcome into a [`RequestResult`]
pub struct RequestExecutor<T> {
    transport: T,
    url: String,
    model: String,
    mode: Mode,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl<T: Transport> RequestExecutor<T> {
    pub fn new(transport: T, config: &Config) -> Self {
        Self {
            transport,
            url: config.server_url.clone(),
            model: config.model.clone(),
            mode: config.mode,
            max_tokens: config.effective_max_tokens(),
            temperature: config.temperature,
            timeout: config.request_timeout,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Build the request body for this mode
    pub fn build_payload(&self, content: &str, max_tokens: u32) -> RequestPayload {
        if self.mode.is_chat() {
            RequestPayload::Chat(ChatCompletionRequest {
                model: self.model.clone(),
                messages: vec![ChatMessage::user(content)],
                max_tokens,
                temperature: self.temperature,
            })
        } else {
            RequestPayload::Embedding(EmbeddingRequest {
                model: self.model.clone(),
                input: content.to_string(),
            })
        }
    }

    /// Perform exactly one request. Never fails: errors become failed results.
    pub async fn execute(&self, request_id: usize, content: &str) -> RequestResult {
        let payload = self.build_payload(content, self.max_tokens);
        let start = Instant::now();

        match self.send(&payload).await {
            Ok(usage) => {
                let duration = start.elapsed();
                let counts = resolve_token_counts(usage, content, self.mode);
                let result = RequestResult::success(
                    request_id,
                    self.mode,
                    counts.prompt,
                    counts.completion,
                    counts.total,
                    duration,
                );
                tracing::info!(
                    request_id,
                    mode = self.mode.label(),
                    prompt_tokens = result.prompt_tokens,
                    completion_tokens = result.completion_tokens,
                    total_tokens = result.total_tokens,
                    estimated = counts.estimated,
                    duration = format_args!("{:.3}s", result.duration),
                    tokens_per_sec = format_args!("{:.2}", result.tokens_per_sec),
                    "Request succeeded"
                );
                result
            }
            Err(err) => {
                let duration = start.elapsed();
                tracing::warn!(
                    request_id,
                    kind = err.kind(),
                    duration = format_args!("{:.3}s", duration.as_secs_f64()),
                    error = %err,
                    "Request failed"
                );
                RequestResult::failed(request_id, duration, &err)
            }
        }
    }

    /// Send one throwaway request with the fixed prefix and a single output
    /// token so the server caches the prefix before measurement starts.
    pub async fn warm_up(&self, prefix: &str) -> Result<(), RequestError> {
        let payload = self.build_payload(prefix, 1);
        self.send(&payload).await.map(|_| ())
    }

    async fn send(&self, payload: &RequestPayload) -> Result<Option<Usage>, RequestError> {
        let body = tokio::time::timeout(self.timeout, self.transport.post(&self.url, payload))
            .await
            .map_err(|_| RequestError::Timeout(self.timeout))??;
        parse_usage(&body)
    }
}

/// Extract the optional usage object from a response body.
///
/// Anything that is not a JSON object is a parse failure; a missing or null
/// `usage` is not.
pub fn parse_usage(body: &str) -> Result<Option<Usage>, RequestError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| RequestError::Parse(e.to_string()))?;
    if !value.is_object() {
        return Err(RequestError::Parse("expected a JSON object".to_string()));
    }
    let envelope: UsageEnvelope =
        serde_json::from_value(value).map_err(|e| RequestError::Parse(e.to_string()))?;
    Ok(envelope.usage)
}

/// Apply the usage fallback rule.
///
/// When the server reports no prompt-side usage, the prompt count is a
/// whitespace word count of the content (a rough approximation) and
/// completion is zero. Embedding requests never have completion tokens.
pub fn resolve_token_counts(usage: Option<Usage>, content: &str, mode: Mode) -> TokenCounts {
    match usage.filter(|u| !u.is_empty()) {
        Some(usage) => {
            let prompt = usage.prompt_tokens.unwrap_or(0);
            let completion = if mode.is_chat() {
                usage.completion_tokens.unwrap_or(0)
            } else {
                0
            };
            TokenCounts {
                prompt,
                completion,
                total: usage
                    .total_tokens
                    .unwrap_or_else(|| prompt.saturating_add(completion)),
                estimated: false,
            }
        }
        None => {
            let prompt = estimate_prompt_tokens(content);
            TokenCounts {
                prompt,
                completion: 0,
                total: prompt,
                estimated: true,
            }
        }
    }
}

fn estimate_prompt_tokens(content: &str) -> u64 {
    content.split_whitespace().count() as u64
}
