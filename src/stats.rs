//! Reduction of a run's results into aggregate statistics.

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

use crate::config::Mode;
use crate::metrics::RequestResult;

/// Aggregate view over one run's results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStatistics {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    /// Percentage of dispatched requests that succeeded, in [0, 100]
    pub success_rate: f64,
    pub summary: Summary,
    /// Token-weighted ingestion rate across all successes (embedding runs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemThroughput>,
}

impl AggregateStatistics {
    pub fn successes(&self) -> Option<&SuccessSummary> {
        match &self.summary {
            Summary::Computed(summary) => Some(summary),
            Summary::NoSuccessfulResults => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Summary {
    /// Every request failed; there is nothing to average
    NoSuccessfulResults,
    Computed(SuccessSummary),
}

/// Min/max/mean figures over successful requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessSummary {
    pub prompt_tokens: TokenSummary,
    pub completion_tokens: TokenSummary,
    pub total_tokens: TokenSummary,
    pub tokens_per_sec: RateSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencySummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenSummary {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Request latency in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub min_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemThroughput {
    pub total_prompt_tokens: u64,
    pub total_duration_secs: f64,
    pub tokens_per_sec: f64,
}

/// Reduce the full result collection.
///
/// Pure and idempotent. The success rate uses every dispatched request as
/// the denominator; every other figure covers successes only.
pub fn aggregate(results: &[RequestResult], mode: Mode) -> AggregateStatistics {
    let successes: Vec<&RequestResult> = results.iter().filter(|r| r.is_success()).collect();
    let total_requests = results.len();
    let successful_requests = successes.len();

    let success_rate = if total_requests == 0 {
        0.0
    } else {
        successful_requests as f64 / total_requests as f64 * 100.0
    };

    let summary = if successes.is_empty() {
        Summary::NoSuccessfulResults
    } else {
        Summary::Computed(SuccessSummary {
            prompt_tokens: token_summary(&successes, |r| r.prompt_tokens),
            completion_tokens: token_summary(&successes, |r| r.completion_tokens),
            total_tokens: token_summary(&successes, |r| r.total_tokens),
            tokens_per_sec: rate_summary(&successes),
            latency: latency_summary(&successes),
        })
    };

    let system = if mode == Mode::Embedding {
        system_throughput(&successes)
    } else {
        None
    };

    AggregateStatistics {
        total_requests,
        successful_requests,
        failed_requests: total_requests - successful_requests,
        success_rate,
        summary,
        system,
    }
}

fn token_summary(successes: &[&RequestResult], field: impl Fn(&RequestResult) -> u64) -> TokenSummary {
    let values: Vec<u64> = successes.iter().map(|r| field(r)).collect();
    // Server-reported counts can be arbitrarily large
    let sum: u128 = values.iter().map(|&v| u128::from(v)).sum();
    TokenSummary {
        min: values.iter().copied().min().unwrap_or(0),
        max: values.iter().copied().max().unwrap_or(0),
        mean: sum as f64 / values.len().max(1) as f64,
    }
}

fn rate_summary(successes: &[&RequestResult]) -> RateSummary {
    let rates = successes.iter().map(|r| r.tokens_per_sec);
    let sum: f64 = rates.clone().sum();
    RateSummary {
        min: rates.clone().fold(f64::INFINITY, f64::min),
        max: rates.fold(f64::NEG_INFINITY, f64::max),
        mean: sum / successes.len().max(1) as f64,
    }
}

fn latency_summary(successes: &[&RequestResult]) -> Option<LatencySummary> {
    // Up to 10 minutes at microsecond resolution, 3 significant figures
    let mut histogram = Histogram::<u64>::new_with_bounds(1, 600_000_000, 3).ok()?;
    for result in successes {
        histogram.saturating_record(((result.duration * 1_000_000.0) as u64).max(1));
    }

    let mean_secs = successes.iter().map(|r| r.duration).sum::<f64>() / successes.len() as f64;
    let ms = |us: u64| us as f64 / 1000.0;

    Some(LatencySummary {
        min_ms: ms(histogram.min()),
        mean_ms: mean_secs * 1000.0,
        p50_ms: ms(histogram.value_at_quantile(0.50)),
        p95_ms: ms(histogram.value_at_quantile(0.95)),
        p99_ms: ms(histogram.value_at_quantile(0.99)),
        max_ms: ms(histogram.max()),
    })
}

fn system_throughput(successes: &[&RequestResult]) -> Option<SystemThroughput> {
    let prompt_sum: u128 = successes.iter().map(|r| u128::from(r.prompt_tokens)).sum();
    let total_duration_secs: f64 = successes.iter().map(|r| r.duration).sum();
    if total_duration_secs <= 0.0 {
        return None;
    }
    Some(SystemThroughput {
        total_prompt_tokens: u64::try_from(prompt_sum).unwrap_or(u64::MAX),
        total_duration_secs,
        tokens_per_sec: prompt_sum as f64 / total_duration_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;
    use proptest::prelude::*;
    use std::time::Duration;

    fn ok(id: usize, mode: Mode, prompt: u64, completion: u64, secs: f64) -> RequestResult {
        RequestResult::success(
            id,
            mode,
            prompt,
            completion,
            prompt + completion,
            Duration::from_secs_f64(secs),
        )
    }

    fn failed(id: usize) -> RequestResult {
        RequestResult::failed(
            id,
            Duration::from_millis(300),
            &RequestError::Transport("connection reset".to_string()),
        )
    }

    #[test]
    fn test_uniform_successes() {
        let results: Vec<_> = (1..=10).map(|i| ok(i, Mode::Mixed, 100, 20, 1.0)).collect();
        let stats = aggregate(&results, Mode::Mixed);

        assert_eq!(stats.total_requests, 10);
        assert_eq!(stats.successful_requests, 10);
        assert_eq!(stats.success_rate, 100.0);
        assert!(stats.system.is_none());

        let summary = stats.successes().unwrap();
        assert_eq!(summary.tokens_per_sec.mean, 20.0);
        assert_eq!(summary.prompt_tokens, TokenSummary { min: 100, max: 100, mean: 100.0 });
        assert_eq!(summary.total_tokens.mean, 120.0);

        let latency = summary.latency.unwrap();
        assert!((latency.mean_ms - 1000.0).abs() < 1e-6);
        assert!((latency.p50_ms - 1000.0).abs() < 1.0);
    }

    #[test]
    fn test_failures_count_in_rate_only() {
        let results = vec![
            ok(1, Mode::Mixed, 100, 10, 1.0),
            failed(2),
            ok(3, Mode::Mixed, 200, 30, 1.0),
            failed(4),
            ok(5, Mode::Mixed, 300, 50, 2.0),
        ];
        let stats = aggregate(&results, Mode::Mixed);

        assert_eq!(stats.successful_requests, 3);
        assert_eq!(stats.failed_requests, 2);
        assert!((stats.success_rate - 60.0).abs() < 1e-9);

        let summary = stats.successes().unwrap();
        assert_eq!(summary.prompt_tokens.min, 100);
        assert_eq!(summary.prompt_tokens.max, 300);
        assert_eq!(summary.prompt_tokens.mean, 200.0);
        assert_eq!(summary.completion_tokens.min, 10);
        assert_eq!(summary.tokens_per_sec.min, 10.0);
        assert_eq!(summary.tokens_per_sec.max, 30.0);
        assert!((summary.tokens_per_sec.mean - 65.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_failed_is_explicit_empty_state() {
        let results: Vec<_> = (1..=4).map(failed).collect();
        let stats = aggregate(&results, Mode::Embedding);

        assert_eq!(stats.summary, Summary::NoSuccessfulResults);
        assert_eq!(stats.success_rate, 0.0);
        assert!(stats.system.is_none());
        assert!(stats.successes().is_none());
    }

    #[test]
    fn test_no_results() {
        let stats = aggregate(&[], Mode::Mixed);
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.summary, Summary::NoSuccessfulResults);
    }

    #[test]
    fn test_system_throughput_is_token_weighted() {
        let results = vec![
            ok(1, Mode::Embedding, 100, 0, 1.0),
            ok(2, Mode::Embedding, 300, 0, 1.0),
            ok(3, Mode::Embedding, 50, 0, 0.5),
            failed(4),
        ];
        let stats = aggregate(&results, Mode::Embedding);

        let system = stats.system.unwrap();
        assert_eq!(system.total_prompt_tokens, 450);
        assert!((system.total_duration_secs - 2.5).abs() < 1e-9);
        assert!((system.tokens_per_sec - 180.0).abs() < 1e-9);

        // Mean of per-request rates differs: (100 + 300 + 100) / 3
        let mean = stats.successes().unwrap().tokens_per_sec.mean;
        assert!((mean - 500.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_system_throughput_needs_positive_duration() {
        let results = vec![ok(1, Mode::Embedding, 100, 0, 0.0)];
        assert!(aggregate(&results, Mode::Embedding).system.is_none());
    }

    #[test]
    fn test_large_token_counts_do_not_overflow() {
        let big = u64::MAX / 2 + 1;
        let results = vec![
            ok(1, Mode::Embedding, big, 0, 1.0),
            ok(2, Mode::Embedding, big, 0, 1.0),
        ];
        let stats = aggregate(&results, Mode::Embedding);

        let summary = stats.successes().unwrap();
        assert_eq!(summary.prompt_tokens.min, big);
        assert_eq!(summary.prompt_tokens.max, big);
        assert!((summary.prompt_tokens.mean - big as f64).abs() / (big as f64) < 1e-12);

        let system = stats.system.unwrap();
        assert_eq!(system.total_prompt_tokens, u64::MAX);
        assert!((system.tokens_per_sec - big as f64).abs() / (big as f64) < 1e-12);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let results = vec![ok(1, Mode::Mixed, 10, 5, 0.2), failed(2), ok(3, Mode::Mixed, 40, 8, 0.9)];
        assert_eq!(aggregate(&results, Mode::Mixed), aggregate(&results, Mode::Mixed));
    }

    #[test]
    fn test_summary_serialization() {
        let stats = aggregate(&[failed(1)], Mode::Mixed);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["summary"]["state"], "no_successful_results");
        assert!(json.get("system").is_none());
    }

    proptest! {
        #[test]
        fn prop_success_rate_in_range(outcomes in prop::collection::vec(any::<bool>(), 0..64)) {
            let results: Vec<_> = outcomes
                .iter()
                .enumerate()
                .map(|(i, &success)| if success { ok(i, Mode::Mixed, 10, 2, 0.1) } else { failed(i) })
                .collect();
            let stats = aggregate(&results, Mode::Mixed);

            prop_assert!((0.0..=100.0).contains(&stats.success_rate));
            prop_assert_eq!(stats.successful_requests + stats.failed_requests, results.len());
            prop_assert_eq!(
                stats.successful_requests,
                outcomes.iter().filter(|&&s| s).count()
            );
        }
    }
}
