use reqwest::Client;
use std::future::Future;
use std::time::Duration;

use crate::error::{ConfigError, RequestError};
use crate::models::openai::RequestPayload;

/// Longest error body kept in a failure message
const ERROR_BODY_LIMIT: usize = 200;

/// The HTTP-request capability the executor depends on.
///
/// One call is one POST of a JSON payload; the returned string is the raw
/// response body of a successful (2xx) response.
pub trait Transport: Send + Sync + 'static {
    fn post(
        &self,
        url: &str,
        payload: &RequestPayload,
    ) -> impl Future<Output = Result<String, RequestError>> + Send;
}

/// reqwest-backed transport with a connection pool sized for the run
pub struct HttpTransport {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Optional bearer token
    api_key: Option<String>,

    /// Per-request timeout, also used to label timeout failures
    request_timeout: Duration,
}

impl HttpTransport {
    /// Create a new transport.
    ///
    /// `pool_size` should be at least the concurrency bound so the pool never
    /// becomes the limiting factor instead of the permit pool.
    pub fn new(
        pool_size: usize,
        request_timeout: Duration,
        api_key: Option<String>,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .pool_max_idle_per_host(pool_size)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            request_timeout,
        })
    }

    fn map_error(&self, err: reqwest::Error) -> RequestError {
        if err.is_timeout() {
            RequestError::Timeout(self.request_timeout)
        } else {
            RequestError::Transport(err.to_string())
        }
    }
}

impl Transport for HttpTransport {
    async fn post(&self, url: &str, payload: &RequestPayload) -> Result<String, RequestError> {
        let mut request = self.client.post(url).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        tracing::debug!(status = %status, "Received HTTP response");

        let body = response.text().await.map_err(|e| self.map_error(e))?;

        if !status.is_success() {
            return Err(RequestError::Status {
                status: status.as_u16(),
                message: truncate_body(&body),
            });
        }

        Ok(body)
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
