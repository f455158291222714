//! Per-request results and their thread-safe collection.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::config::Mode;
use crate::error::RequestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    Success,
    Failed,
}

/// Outcome of one dispatched request. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResult {
    pub request_id: usize,
    pub status: RequestStatus,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Wall time in seconds, recorded for failures too
    pub duration: f64,
    pub tokens_per_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequestResult {
    /// A successful request; the rate is derived from the mode's token basis
    pub fn success(
        request_id: usize,
        mode: Mode,
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
        duration: Duration,
    ) -> Self {
        let duration = duration.as_secs_f64();
        let basis = if mode.measures_prompt() {
            prompt_tokens
        } else {
            completion_tokens
        };
        Self {
            request_id,
            status: RequestStatus::Success,
            prompt_tokens,
            completion_tokens,
            total_tokens,
            duration,
            tokens_per_sec: tokens_per_sec(basis, duration),
            error: None,
        }
    }

    /// A failed request: zero tokens, zero rate, elapsed time kept
    pub fn failed(request_id: usize, duration: Duration, error: &RequestError) -> Self {
        Self {
            request_id,
            status: RequestStatus::Failed,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            duration: duration.as_secs_f64(),
            tokens_per_sec: 0.0,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RequestStatus::Success
    }
}

/// Tokens per second; zero for a zero (or negative) duration
pub fn tokens_per_sec(tokens: u64, duration_secs: f64) -> f64 {
    if duration_secs > 0.0 {
        tokens as f64 / duration_secs
    } else {
        0.0
    }
}

/// Collects results from concurrently running request tasks
pub struct ResultCollector {
    /// Results in completion order
    results: Mutex<Vec<RequestResult>>,
    /// Successful requests so far
    success_count: AtomicU64,
    /// Failed requests so far
    error_count: AtomicU64,
    /// Number of results the run is expected to produce
    expected: usize,
}

impl ResultCollector {
    pub fn new(expected: usize) -> Self {
        Self {
            results: Mutex::new(Vec::with_capacity(expected)),
            success_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            expected,
        }
    }

    /// Append one result
    pub fn record(&self, result: RequestResult) {
        if result.is_success() {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }

        let completed = {
            let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
            results.push(result);
            results.len()
        };

        // Roughly ten progress lines per run
        let step = (self.expected / 10).max(1);
        if completed % step == 0 || completed == self.expected {
            tracing::debug!(
                completed,
                expected = self.expected,
                succeeded = self.success_count(),
                failed = self.error_count(),
                "Progress"
            );
        }
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the collected results, ordered by request id
    pub fn take_results(&self) -> Vec<RequestResult> {
        let mut results =
            std::mem::take(&mut *self.results.lock().unwrap_or_else(PoisonError::into_inner));
        results.sort_by_key(|r| r.request_id);
        results
    }
}
