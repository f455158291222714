//! Run orchestration: preflight, bounded dispatch and aggregation.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{Config, Mode};
use crate::error::{ConfigError, RequestError, Result};
use crate::executor::RequestExecutor;
use crate::http_client::{HttpTransport, Transport};
use crate::metrics::{RequestResult, ResultCollector};
use crate::prompt::{PromptGenerator, PromptSource};
use crate::stats::{aggregate, AggregateStatistics};

/// Everything a finished run hands to the reporter
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// One entry per dispatched request, ordered by request id
    pub results: Vec<RequestResult>,
    pub statistics: AggregateStatistics,
    /// Wall time of the dispatch phase
    pub elapsed: Duration,
    /// Preflight outcome; None when no preflight was attempted
    pub warmed_up: Option<bool>,
}

impl RunOutcome {
    /// Completed requests per second of dispatch wall time
    pub fn requests_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.results.len() as f64 / secs
        } else {
            0.0
        }
    }
}

/// Dispatches `total_requests` requests with at most `concurrent_requests`
/// in flight at any moment.
pub struct StressRunner<T> {
    config: Config,
    executor: Arc<RequestExecutor<T>>,
    prompts: PromptSource,
}

impl StressRunner<HttpTransport> {
    /// Create a runner backed by a reqwest client pooled for the run's concurrency
    pub fn from_config(config: Config) -> Result<Self> {
        let transport = HttpTransport::new(
            config.concurrent_requests,
            config.request_timeout,
            config.api_key.clone(),
        )?;
        Self::new(config, transport)
    }
}

impl<T: Transport> StressRunner<T> {
    /// Create a runner over any transport.
    ///
    /// Fails before any request is sent when the configuration is invalid or
    /// token-generation mode has no fixed prefix.
    pub fn new(config: Config, transport: T) -> Result<Self> {
        config.validate()?;

        let prompts = match (config.mode, &config.fixed_prefix) {
            (Mode::TokenGeneration, Some(prefix)) => PromptSource::Fixed(Arc::from(prefix.as_str())),
            (Mode::TokenGeneration, None) => return Err(ConfigError::MissingFixedPrefix),
            _ => PromptSource::Generated {
                generator: PromptGenerator::new(config.prompt_style, config.seed),
                context_tokens: config.context_size,
            },
        };

        let executor = Arc::new(RequestExecutor::new(transport, &config));
        Ok(Self {
            config,
            executor,
            prompts,
        })
    }

    /// Replace the generator used in generated-content modes
    pub fn with_prompt_generator(mut self, generator: PromptGenerator) -> Self {
        if let PromptSource::Generated {
            generator: current, ..
        } = &mut self.prompts
        {
            *current = generator;
        }
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Send the single preflight request for token-generation runs.
    ///
    /// A failed preflight is logged and the run continues.
    pub async fn warm_up(&self) -> Option<bool> {
        let PromptSource::Fixed(prefix) = &self.prompts else {
            return None;
        };

        tracing::info!(prefix_chars = prefix.chars().count(), "Sending preflight request");
        match self.executor.warm_up(prefix).await {
            Ok(()) => {
                tracing::info!("Preflight request completed, prefix should be cached");
                Some(true)
            }
            Err(e) => {
                tracing::warn!(kind = e.kind(), error = %e, "Preflight request failed, continuing");
                Some(false)
            }
        }
    }

    /// Dispatch every request and wait for all of them.
    ///
    /// Returns exactly `total_requests` results ordered by request id.
    pub async fn dispatch(&mut self) -> Vec<RequestResult> {
        let total = self.config.total_requests;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrent_requests));
        let collector = Arc::new(ResultCollector::new(total));
        let mut handles = Vec::with_capacity(total);

        for request_id in 1..=total {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let prompt = self.prompts.next_prompt();
            let executor = Arc::clone(&self.executor);
            let collector = Arc::clone(&collector);

            let task = async move {
                let result = executor.execute(request_id, &prompt).await;
                drop(permit);
                collector.record(result);
            };
            let spawned_at = Instant::now();
            let handle = tokio::spawn(task.instrument(tracing::info_span!("request", request_id)));
            handles.push((request_id, spawned_at, handle));
        }

        for (request_id, spawned_at, handle) in handles {
            if let Err(e) = handle.await {
                let error = RequestError::Aborted(e.to_string());
                tracing::error!(request_id, error = %error, "Request task aborted");
                collector.record(RequestResult::failed(request_id, spawned_at.elapsed(), &error));
            }
        }

        collector.take_results()
    }

    /// Preflight, dispatch and aggregate inside one run-scoped span
    pub async fn run(mut self) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("stress_run", %run_id, mode = %self.config.mode);

        async move {
            let started_at = Utc::now();
            tracing::info!(
                url = %self.config.server_url,
                model = %self.config.model,
                concurrency = self.config.concurrent_requests,
                total = self.config.total_requests,
                "Starting {} run",
                self.config.mode.label()
            );

            let warmed_up = self.warm_up().await;

            let start = Instant::now();
            let results = self.dispatch().await;
            let elapsed = start.elapsed();

            let statistics = aggregate(&results, self.config.mode);
            tracing::info!(
                succeeded = statistics.successful_requests,
                failed = statistics.failed_requests,
                success_rate = format_args!("{:.1}%", statistics.success_rate),
                elapsed = format_args!("{:.2}s", elapsed.as_secs_f64()),
                "Run complete"
            );

            RunOutcome {
                run_id,
                started_at,
                results,
                statistics,
                elapsed,
                warmed_up,
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::openai::RequestPayload;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Tracker {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        contents: Mutex<Vec<String>>,
    }

    /// Succeeds after a fixed delay; the first `failures` calls fail instead
    struct TrackingTransport {
        tracker: Arc<Tracker>,
        delay: Duration,
        failures: usize,
    }

    impl Transport for TrackingTransport {
        async fn post(&self, _url: &str, payload: &RequestPayload) -> std::result::Result<String, RequestError> {
            let call = self.tracker.calls.fetch_add(1, Ordering::SeqCst);
            self.tracker.contents.lock().unwrap().push(payload.content().to_string());
            let now = self.tracker.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.tracker.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.tracker.in_flight.fetch_sub(1, Ordering::SeqCst);

            if call < self.failures {
                return Err(RequestError::Transport("connection reset".to_string()));
            }
            Ok(r#"{"usage":{"prompt_tokens":100,"completion_tokens":20,"total_tokens":120}}"#.to_string())
        }
    }

    fn runner(config: Config, failures: usize) -> (StressRunner<TrackingTransport>, Arc<Tracker>) {
        let tracker = Arc::new(Tracker::default());
        let transport = TrackingTransport {
            tracker: Arc::clone(&tracker),
            delay: Duration::from_secs(1),
            failures,
        };
        (StressRunner::new(config, transport).unwrap(), tracker)
    }

    fn config(mode: Mode, concurrency: usize, total: usize) -> Config {
        Config {
            mode,
            concurrent_requests: concurrency,
            total_requests: total,
            context_size: 50,
            seed: Some(7),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_respects_concurrency_bound() {
        let (mut runner, tracker) = runner(config(Mode::Mixed, 3, 20), 0);

        let results = runner.dispatch().await;

        assert_eq!(results.len(), 20);
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 20);
        assert_eq!(tracker.peak.load(Ordering::SeqCst), 3);
        let ids: Vec<usize> = results.iter().map(|r| r.request_id).collect();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_uniform_successes() {
        let (runner, _tracker) = runner(config(Mode::Mixed, 2, 10), 0);

        let outcome = runner.run().await;

        assert_eq!(outcome.warmed_up, None);
        assert_eq!(outcome.statistics.success_rate, 100.0);
        let summary = outcome.statistics.successes().unwrap();
        assert!((summary.tokens_per_sec.mean - 20.0).abs() < 1e-6);
        // Five waves of two one-second requests
        assert!((outcome.elapsed.as_secs_f64() - 5.0).abs() < 0.01);
        assert!((outcome.requests_per_second() - 2.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_become_results() {
        let (mut runner, _tracker) = runner(config(Mode::Mixed, 5, 5), 2);

        let results = runner.dispatch().await;
        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_generation_reuses_prefix_and_warms_up() {
        let config = Config {
            fixed_prefix: Some("shared prefix".to_string()),
            ..config(Mode::TokenGeneration, 2, 4)
        };
        let (runner, tracker) = runner(config, 0);

        let outcome = runner.run().await;

        assert_eq!(outcome.warmed_up, Some(true));
        // Preflight plus four measured requests
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 5);
        let contents = tracker.contents.lock().unwrap();
        assert!(contents.iter().all(|c| c == "shared prefix"));
        assert_eq!(outcome.results.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_preflight_does_not_abort() {
        let config = Config {
            fixed_prefix: Some("prefix".to_string()),
            ..config(Mode::TokenGeneration, 1, 2)
        };
        let (runner, _tracker) = runner(config, 1);

        let outcome = runner.run().await;
        assert_eq!(outcome.warmed_up, Some(false));
        assert_eq!(outcome.statistics.successful_requests, 2);
    }

    #[test]
    fn test_token_generation_without_prefix_is_rejected() {
        let tracker = Arc::new(Tracker::default());
        let transport = TrackingTransport {
            tracker: Arc::clone(&tracker),
            delay: Duration::ZERO,
            failures: 0,
        };

        let err = StressRunner::new(config(Mode::TokenGeneration, 1, 1), transport).err();
        assert_eq!(err, Some(ConfigError::MissingFixedPrefix));
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let tracker = Arc::new(Tracker::default());
        let transport = TrackingTransport {
            tracker,
            delay: Duration::ZERO,
            failures: 0,
        };
        assert!(StressRunner::new(config(Mode::Mixed, 0, 1), transport).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_prompt_generator() {
        use crate::prompt::PromptStyle;
        use rand::{rngs::StdRng, SeedableRng};

        let generator = PromptGenerator::with_vocabulary(
            PromptStyle::Random,
            vec!["alpha".to_string()],
            StdRng::seed_from_u64(1),
        )
        .unwrap();
        let (runner, tracker) = runner(config(Mode::Mixed, 2, 2), 0);
        let mut runner = runner.with_prompt_generator(generator);

        runner.dispatch().await;

        let contents = tracker.contents.lock().unwrap();
        for content in contents.iter() {
            assert!(content.starts_with("User query: alpha"));
        }
    }

    /// Panics on the first call after a delay, succeeds afterwards
    struct PanickingTransport {
        calls: AtomicUsize,
    }

    impl Transport for PanickingTransport {
        async fn post(&self, _url: &str, _payload: &RequestPayload) -> std::result::Result<String, RequestError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
            if call == 0 {
                panic!("transport blew up");
            }
            Ok(r#"{"usage":{"prompt_tokens":10,"completion_tokens":2,"total_tokens":12}}"#.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicked_task_records_elapsed_time() {
        let transport = PanickingTransport {
            calls: AtomicUsize::new(0),
        };
        let mut runner = StressRunner::new(config(Mode::Mixed, 1, 2), transport).unwrap();

        let results = runner.dispatch().await;

        assert_eq!(results.len(), 2);
        let aborted = &results[0];
        assert_eq!(aborted.request_id, 1);
        assert!(!aborted.is_success());
        assert!(aborted.duration > 0.0);
        assert!((aborted.duration - 0.3).abs() < 0.01);
        assert!(aborted.error.as_deref().unwrap().starts_with("Request task aborted"));
        assert!(results[1].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_runs_send_identical_prompts() {
        let (mut first, first_tracker) = runner(config(Mode::Embedding, 1, 3), 0);
        let (mut second, second_tracker) = runner(config(Mode::Embedding, 1, 3), 0);

        first.dispatch().await;
        second.dispatch().await;

        let a = first_tracker.contents.lock().unwrap().clone();
        let b = second_tracker.contents.lock().unwrap().clone();
        assert_eq!(a.len(), 3);
        assert_eq!(a, b);
        assert_ne!(a[0], a[1]);
    }
}
