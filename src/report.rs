//! Report generation for run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Config, Mode};
use crate::metrics::RequestResult;
use crate::runner::RunOutcome;
use crate::stats::AggregateStatistics;

const RULE: &str = "───────────────────────────────────────────────────────────────";

/// Complete run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub server_url: String,
    pub model: String,
    pub mode: Mode,
    pub concurrency: usize,
    pub total_requests: usize,
    pub context_size: usize,
    pub max_tokens: u32,
    pub elapsed_secs: f64,
    pub requests_per_second: f64,
    /// Preflight outcome; absent when no preflight was attempted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmed_up: Option<bool>,
    pub statistics: AggregateStatistics,
    /// First few successful results, in request id order
    pub samples: Vec<RequestResult>,
}

impl RunReport {
    /// Create a report from a finished run
    pub fn from_outcome(config: &Config, outcome: &RunOutcome) -> Self {
        let samples = outcome
            .results
            .iter()
            .filter(|r| r.is_success())
            .take(config.sample_size)
            .cloned()
            .collect();

        Self {
            run_id: outcome.run_id.to_string(),
            started_at: outcome.started_at,
            server_url: config.server_url.clone(),
            model: config.model.clone(),
            mode: config.mode,
            concurrency: config.concurrent_requests,
            total_requests: config.total_requests,
            context_size: config.context_size,
            max_tokens: config.effective_max_tokens(),
            elapsed_secs: outcome.elapsed.as_secs_f64(),
            requests_per_second: outcome.requests_per_second(),
            warmed_up: outcome.warmed_up,
            statistics: outcome.statistics.clone(),
            samples,
        }
    }

    /// Render the human-readable report
    pub fn render_table(&self) -> String {
        let mut out = Vec::new();
        let stats = &self.statistics;

        out.push(String::new());
        out.push("╔══════════════════════════════════════════════════════════════╗".to_string());
        out.push(format!("║ {:^60} ║", "LLM STRESS TEST RESULTS"));
        out.push("╚══════════════════════════════════════════════════════════════╝".to_string());
        out.push(format!("Mode:         {}", self.mode.label()));
        out.push(format!("Server:       {}", self.server_url));
        out.push(format!("Model:        {}", self.model));
        out.push(format!(
            "Load:         {} requests, {} concurrent, context {} tokens",
            self.total_requests, self.concurrency, self.context_size
        ));
        out.push(format!(
            "Started:      {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        out.push(format!(
            "Elapsed:      {:.2}s ({:.2} req/s)",
            self.elapsed_secs, self.requests_per_second
        ));
        if let Some(warmed_up) = self.warmed_up {
            out.push(format!(
                "Preflight:    {}",
                if warmed_up { "ok" } else { "failed" }
            ));
        }
        out.push(String::new());

        let Some(summary) = stats.successes() else {
            out.push("No successful results. Check that the server is reachable and the run is configured correctly.".to_string());
            out.push(format!(
                "Success rate: {:.2}% ({}/{} requests)",
                stats.success_rate, stats.successful_requests, stats.total_requests
            ));
            out.push(String::new());
            return out.join("\n");
        };

        out.push(format!("┌{RULE}┐"));
        out.push(format!(
            "│ {:<20} │ {:>11} │ {:>11} │ {:>11} │",
            "Metric", "Min", "Mean", "Max"
        ));
        out.push(format!("├{RULE}┤"));
        for (label, tokens) in [
            ("Prompt tokens", &summary.prompt_tokens),
            ("Completion tokens", &summary.completion_tokens),
            ("Total tokens", &summary.total_tokens),
        ] {
            out.push(format!(
                "│ {:<20} │ {:>11} │ {:>11.0} │ {:>11} │",
                label, tokens.min, tokens.mean, tokens.max
            ));
        }
        out.push(format!(
            "│ {:<20} │ {:>11.2} │ {:>11.2} │ {:>11.2} │",
            "Tokens/second", summary.tokens_per_sec.min, summary.tokens_per_sec.mean, summary.tokens_per_sec.max
        ));
        if let Some(latency) = &summary.latency {
            out.push(format!(
                "│ {:<20} │ {:>11.1} │ {:>11.1} │ {:>11.1} │",
                "Latency (ms)", latency.min_ms, latency.mean_ms, latency.max_ms
            ));
        }
        out.push(format!("└{RULE}┘"));

        if let Some(latency) = &summary.latency {
            out.push(format!(
                "Latency percentiles: p50 {:.1}ms, p95 {:.1}ms, p99 {:.1}ms",
                latency.p50_ms, latency.p95_ms, latency.p99_ms
            ));
        }
        if let Some(system) = &stats.system {
            out.push(format!(
                "System throughput: {:.2} tokens/s ({} tokens over {:.2}s of request time)",
                system.tokens_per_sec, system.total_prompt_tokens, system.total_duration_secs
            ));
        }
        out.push(format!(
            "Success rate: {:.2}% ({}/{} requests)",
            stats.success_rate, stats.successful_requests, stats.total_requests
        ));

        out.push(String::new());
        out.push("Context check (configured vs mean observed):".to_string());
        out.push(format!(
            "  Prompt tokens:     {:>8} vs {:>10.0} ({:.0}%)",
            self.context_size,
            summary.prompt_tokens.mean,
            percent_of(summary.prompt_tokens.mean, self.context_size as f64)
        ));
        if self.mode.is_chat() {
            out.push(format!(
                "  Completion tokens: {:>8} vs {:>10.0} ({:.0}%)",
                self.max_tokens,
                summary.completion_tokens.mean,
                percent_of(summary.completion_tokens.mean, f64::from(self.max_tokens))
            ));
        }

        if !self.samples.is_empty() {
            out.push(String::new());
            out.push(format!("Sample results (first {}):", self.samples.len()));
            for r in &self.samples {
                out.push(format!(
                    "  #{:<5} prompt {:>7}  completion {:>6}  total {:>7}  {:>7.2}s  {:>9.2} tok/s",
                    r.request_id,
                    r.prompt_tokens,
                    r.completion_tokens,
                    r.total_tokens,
                    r.duration,
                    r.tokens_per_sec
                ));
            }
        }
        out.push(String::new());

        out.join("\n")
    }

    /// Print the report as an ASCII table
    pub fn print_table(&self) {
        println!("{}", self.render_table());
    }

    /// Export the report as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

fn percent_of(observed: f64, configured: f64) -> f64 {
    if configured > 0.0 {
        observed / configured * 100.0
    } else {
        0.0
    }
}
