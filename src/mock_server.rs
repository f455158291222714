//! In-process OpenAI-compatible endpoint for standalone runs and tests.
//!
//! Serves `/v1/chat/completions` and `/v1/embeddings` with a fixed latency,
//! an optional random error rate and optional omission of the `usage` object.
//! It also records the peak number of requests it was serving at once.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use rand::Rng;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::config::{Config, Mode};
use crate::models::openai::{ChatCompletionRequest, EmbeddingRequest, Usage};
use crate::prompt::CHARS_PER_TOKEN;

/// Upper bound on generated completion text
const MAX_COMPLETION_CHARS: usize = 4_000;

/// Configuration for the mock endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct MockServerConfig {
    /// Port to listen on (0 for random)
    pub port: u16,
    /// Simulated processing time per request in milliseconds
    pub latency_ms: u64,
    /// Error rate (0.0 to 1.0)
    pub error_rate: f64,
    /// Leave `usage` out of every response
    pub omit_usage: bool,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            latency_ms: 50,
            error_rate: 0.0,
            omit_usage: false,
        }
    }
}

struct MockState {
    config: MockServerConfig,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests_received: AtomicUsize,
}

impl MockState {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.requests_received.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    fn should_fail(&self) -> bool {
        self.config.error_rate > 0.0 && rand::thread_rng().gen::<f64>() < self.config.error_rate
    }

    fn usage(&self, prompt_tokens: u64, completion_tokens: Option<u64>) -> Option<Usage> {
        if self.config.omit_usage {
            return None;
        }
        Some(Usage {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens,
            total_tokens: Some(prompt_tokens + completion_tokens.unwrap_or(0)),
        })
    }
}

struct InFlightGuard(Arc<MockState>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock inference server
pub struct MockInferenceServer {
    state: Arc<MockState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    port: u16,
}

impl MockInferenceServer {
    /// Create a new mock server with the given configuration
    pub fn new(config: MockServerConfig) -> Self {
        Self {
            state: Arc::new(MockState {
                config,
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                requests_received: AtomicUsize::new(0),
            }),
            shutdown_tx: None,
            port: 0,
        }
    }

    /// Start the mock server and return the actual port
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("127.0.0.1:{}", self.state.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        self.port = port;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = Router::new()
            .route("/v1/chat/completions", post(handle_chat))
            .route("/v1/embeddings", post(handle_embeddings))
            .with_state(Arc::clone(&self.state));

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        tracing::debug!(port, "Mock inference server listening");
        Ok(port)
    }

    /// Get the server's port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL of the server
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.url())
    }

    pub fn embeddings_url(&self) -> String {
        format!("{}/v1/embeddings", self.url())
    }

    /// Highest number of requests that were being served at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Number of requests that reached a handler
    pub fn requests_received(&self) -> usize {
        self.state.requests_received.load(Ordering::SeqCst)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockInferenceServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the mock server requested by `config`, if any, and point the run at
/// the endpoint matching its mode. The server stops when the handle drops.
pub async fn start_for(config: &mut Config) -> anyhow::Result<Option<MockInferenceServer>> {
    let Some(mock_config) = config.mock_server.clone() else {
        return Ok(None);
    };

    let mut server = MockInferenceServer::new(mock_config);
    server.start().await?;
    config.server_url = match config.mode {
        Mode::Embedding => server.embeddings_url(),
        _ => server.chat_url(),
    };
    tracing::info!(url = %config.server_url, "Mock inference server started");
    Ok(Some(server))
}

/// Handle /v1/chat/completions
async fn handle_chat(
    State(state): State<Arc<MockState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let _guard = state.enter();
    tokio::time::sleep(Duration::from_millis(state.config.latency_ms)).await;

    if state.should_fail() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Simulated error").into_response();
    }

    let prompt: usize = request
        .messages
        .iter()
        .map(|m| m.content.chars().count())
        .sum();
    let prompt_tokens = estimate_tokens(prompt);
    let completion_tokens = u64::from(request.max_tokens);
    let content = generate_content(
        (request.max_tokens as usize)
            .saturating_mul(CHARS_PER_TOKEN)
            .min(MAX_COMPLETION_CHARS),
    );

    let mut body = json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": request.model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "length"
        }]
    });
    if let Some(usage) = state.usage(prompt_tokens, Some(completion_tokens)) {
        body["usage"] = json!(usage);
    }

    Json(body).into_response()
}

/// Handle /v1/embeddings
async fn handle_embeddings(
    State(state): State<Arc<MockState>>,
    Json(request): Json<EmbeddingRequest>,
) -> Response {
    let _guard = state.enter();
    tokio::time::sleep(Duration::from_millis(state.config.latency_ms)).await;

    if state.should_fail() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Simulated error").into_response();
    }

    let prompt_tokens = estimate_tokens(request.input.chars().count());
    let embedding: Vec<f32> = {
        let mut rng = rand::thread_rng();
        (0..8).map(|_| rng.gen_range(-1.0..1.0)).collect()
    };

    let mut body = json!({
        "object": "list",
        "data": [{"object": "embedding", "index": 0, "embedding": embedding}],
        "model": request.model
    });
    if let Some(usage) = state.usage(prompt_tokens, None) {
        body["usage"] = json!(usage);
    }

    Json(body).into_response()
}

fn estimate_tokens(chars: usize) -> u64 {
    chars.div_ceil(CHARS_PER_TOKEN) as u64
}

/// Generate random content of the specified size
fn generate_content(size: usize) -> String {
    const WORDS: &[&str] = &[
        "attention", "query", "key", "value", "softmax", "layer", "token", "context", "head",
        "embedding", "model", "sequence", "weight", "scale", "output",
    ];

    let mut rng = rand::thread_rng();
    let mut result = String::with_capacity(size);

    while result.len() < size {
        let word = WORDS[rng.gen_range(0..WORDS.len())];
        if !result.is_empty() {
            result.push(' ');
        }
        result.push_str(word);
    }

    result.truncate(size);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(4), 1);
        assert_eq!(estimate_tokens(5), 2);
        assert_eq!(estimate_tokens(24_000), 6_000);
    }

    #[test]
    fn test_generate_content_size() {
        assert_eq!(generate_content(0), "");
        assert_eq!(generate_content(123).len(), 123);
    }

    #[tokio::test]
    async fn test_mock_chat_endpoint() {
        let config = MockServerConfig {
            latency_ms: 1,
            ..Default::default()
        };

        let mut server = MockInferenceServer::new(config);
        let port = server.start().await.unwrap();
        assert!(port > 0);

        let client = reqwest::Client::new();
        let resp = client
            .post(server.chat_url())
            .json(&json!({
                "model": "kCode",
                "messages": [{"role": "user", "content": "a".repeat(400)}],
                "max_tokens": 20,
                "temperature": 0.7
            }))
            .send()
            .await
            .unwrap();

        assert!(resp.status().is_success());
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["usage"]["prompt_tokens"], 100);
        assert_eq!(body["usage"]["completion_tokens"], 20);
        assert_eq!(body["usage"]["total_tokens"], 120);
        assert_eq!(server.requests_received(), 1);
        assert_eq!(server.peak_in_flight(), 1);
        server.stop();
    }

    #[tokio::test]
    async fn test_mock_embeddings_without_usage() {
        let config = MockServerConfig {
            latency_ms: 0,
            omit_usage: true,
            ..Default::default()
        };

        let mut server = MockInferenceServer::new(config);
        server.start().await.unwrap();

        let resp = reqwest::Client::new()
            .post(server.embeddings_url())
            .json(&json!({"model": "kCodeEmbedding", "input": "hello world"}))
            .send()
            .await
            .unwrap();

        assert!(resp.status().is_success());
        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body.get("usage").is_none());
        assert_eq!(body["data"][0]["embedding"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_start_for_points_run_at_mock() {
        let mut config = Config {
            mode: Mode::Embedding,
            server_url: "http://localhost:8001/v1/embeddings".to_string(),
            mock_server: Some(MockServerConfig {
                latency_ms: 0,
                ..Default::default()
            }),
            ..Default::default()
        };

        let server = start_for(&mut config).await.unwrap().unwrap();
        assert_eq!(config.server_url, server.embeddings_url());
        assert!(server.port() > 0);

        let mut chat = Config::default();
        assert!(start_for(&mut chat).await.unwrap().is_none());
        assert_eq!(chat.server_url, Config::default().server_url);
    }

    #[tokio::test]
    async fn test_mock_always_fails_at_full_error_rate() {
        let config = MockServerConfig {
            latency_ms: 0,
            error_rate: 1.0,
            ..Default::default()
        };

        let mut server = MockInferenceServer::new(config);
        server.start().await.unwrap();

        let resp = reqwest::Client::new()
            .post(server.embeddings_url())
            .json(&json!({"model": "m", "input": "x"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
