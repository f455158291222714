use clap::Parser;
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::mock_server::MockServerConfig;
use crate::prompt::{PromptGenerator, PromptStyle};

const CHAT_DEFAULT_URL: &str = "http://localhost:8000/v1/chat/completions";
const CHAT_DEFAULT_MODEL: &str = "kCode";
const CHAT_DEFAULT_CONCURRENCY: usize = 4;
const CHAT_DEFAULT_TOTAL: usize = 40;

const EMBEDDING_DEFAULT_URL: &str = "http://localhost:8001/v1/embeddings";
const EMBEDDING_DEFAULT_MODEL: &str = "kCodeEmbedding";
const EMBEDDING_DEFAULT_CONCURRENCY: usize = 50;
const EMBEDDING_DEFAULT_TOTAL: usize = 200;

/// LLM Stress - concurrent load generator for inference endpoints
#[derive(Parser, Debug, Clone)]
#[command(name = "llm-stress", author, version, about, long_about = None)]
pub struct CliArgs {
    /// Endpoint URL (chat completions, or embeddings with --embedding)
    #[arg(short = 'u', long, env = "STRESS_SERVER_URL")]
    pub server_url: Option<String>,

    /// Model name sent in every request
    #[arg(short = 'm', long, env = "STRESS_MODEL")]
    pub model: Option<String>,

    /// Bearer token for the endpoint
    #[arg(short = 'k', long, env = "STRESS_API_KEY")]
    pub api_key: Option<String>,

    /// Maximum number of requests in flight
    #[arg(short = 'c', long)]
    pub concurrent_requests: Option<usize>,

    /// Total number of requests to send
    #[arg(short = 'n', long)]
    pub total_requests: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "180")]
    pub request_timeout: u64,

    /// Desired context window in tokens
    #[arg(long, default_value = "6000")]
    pub context_size: usize,

    /// Maximum tokens to generate per request (ignored with --prompt-processing)
    #[arg(long, default_value = "350")]
    pub max_tokens: u32,

    /// Sampling temperature for chat requests
    #[arg(long, default_value = "0.7")]
    pub temperature: f32,

    /// Measure prompt ingestion: randomized prompts, max_tokens=1
    #[arg(long = "prompt-processing", visible_alias = "pp")]
    pub prompt_processing: bool,

    /// Measure generation over a cached fixed prefix
    #[arg(long = "token-generation", visible_alias = "tg")]
    pub token_generation: bool,

    /// Benchmark an embeddings endpoint
    #[arg(long)]
    pub embedding: bool,

    /// Fixed prefix for --token-generation (generated from --context-size if omitted)
    #[arg(long)]
    pub fixed_prefix: Option<String>,

    /// Prompt generation style (random, repeat)
    #[arg(long, default_value = "random")]
    pub prompt_style: String,

    /// Seed for reproducible prompts
    #[arg(long, env = "STRESS_SEED")]
    pub seed: Option<u64>,

    /// Number of individual results shown in the report
    #[arg(long, default_value = "5")]
    pub sample_size: usize,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Run against an in-process mock endpoint instead of --server-url
    #[arg(long)]
    pub mock_server: bool,

    /// Mock endpoint latency per request in milliseconds
    #[arg(long, default_value = "50")]
    pub mock_latency_ms: u64,

    /// Mock endpoint error rate (0.0 to 1.0)
    #[arg(long, default_value = "0.0")]
    pub mock_error_rate: f64,
}

/// What a run measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Randomized prompt, full output budget, generation throughput
    #[default]
    Mixed,
    /// Randomized prompt, one output token, ingestion throughput
    PromptProcessing,
    /// Fixed cached prefix, full output budget, generation throughput
    TokenGeneration,
    /// Embeddings endpoint, ingestion throughput
    Embedding,
}

impl Mode {
    /// Resolve the mode from the mutually exclusive CLI switches
    pub fn from_flags(prompt_processing: bool, token_generation: bool, embedding: bool) -> Result<Self> {
        match (prompt_processing, token_generation, embedding) {
            (true, true, _) => Err(ConfigError::ConflictingModes(
                "prompt-processing",
                "token-generation",
            )),
            (true, _, true) => Err(ConfigError::ConflictingModes("prompt-processing", "embedding")),
            (_, true, true) => Err(ConfigError::ConflictingModes("token-generation", "embedding")),
            (true, false, false) => Ok(Mode::PromptProcessing),
            (false, true, false) => Ok(Mode::TokenGeneration),
            (false, false, true) => Ok(Mode::Embedding),
            (false, false, false) => Ok(Mode::Mixed),
        }
    }

    pub fn is_chat(&self) -> bool {
        !matches!(self, Mode::Embedding)
    }

    /// Whether throughput is measured on prompt tokens rather than completion tokens
    pub fn measures_prompt(&self) -> bool {
        matches!(self, Mode::PromptProcessing | Mode::Embedding)
    }

    /// Human readable label for logs and reports
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Mixed => "Mixed",
            Mode::PromptProcessing => "Prompt Processing",
            Mode::TokenGeneration => "Token Generation",
            Mode::Embedding => "Embedding",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Mixed => write!(f, "mixed"),
            Mode::PromptProcessing => write!(f, "prompt-processing"),
            Mode::TokenGeneration => write!(f, "token-generation"),
            Mode::Embedding => write!(f, "embedding"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Resolved configuration for one run. Read-only once dispatch starts.
#[derive(Clone, Debug)]
pub struct Config {
    // Target
    pub server_url: String,
    pub model: String,
    pub api_key: Option<String>,

    // Load shape
    pub concurrent_requests: usize,
    pub total_requests: usize,
    pub request_timeout: Duration,

    // Request content
    pub mode: Mode,
    pub context_size: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub prompt_style: PromptStyle,
    pub fixed_prefix: Option<String>,
    pub seed: Option<u64>,

    // Output
    pub sample_size: usize,
    pub json_output: bool,
    pub log_level: String,
    pub log_format: LogFormat,

    // Standalone mode
    pub mock_server: Option<MockServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: CHAT_DEFAULT_URL.to_string(),
            model: CHAT_DEFAULT_MODEL.to_string(),
            api_key: None,
            concurrent_requests: CHAT_DEFAULT_CONCURRENCY,
            total_requests: CHAT_DEFAULT_TOTAL,
            request_timeout: Duration::from_secs(180),
            mode: Mode::Mixed,
            context_size: 6000,
            max_tokens: 350,
            temperature: 0.7,
            prompt_style: PromptStyle::Random,
            fixed_prefix: None,
            seed: None,
            sample_size: 5,
            json_output: false,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            mock_server: None,
        }
    }
}

impl Config {
    /// Load configuration with priority: CLI > ENV (.env included) > defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_args(CliArgs::parse())
    }

    /// Build and validate a configuration from parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let mode = Mode::from_flags(args.prompt_processing, args.token_generation, args.embedding)?;

        let (default_url, default_model, default_concurrency, default_total) = match mode {
            Mode::Embedding => (
                EMBEDDING_DEFAULT_URL,
                EMBEDDING_DEFAULT_MODEL,
                EMBEDDING_DEFAULT_CONCURRENCY,
                EMBEDDING_DEFAULT_TOTAL,
            ),
            _ => (
                CHAT_DEFAULT_URL,
                CHAT_DEFAULT_MODEL,
                CHAT_DEFAULT_CONCURRENCY,
                CHAT_DEFAULT_TOTAL,
            ),
        };

        let prompt_style = args
            .prompt_style
            .parse::<PromptStyle>()
            .map_err(|reason| ConfigError::InvalidValue {
                field: "prompt_style",
                reason,
            })?;

        let mock_server = args.mock_server.then(|| MockServerConfig {
            latency_ms: args.mock_latency_ms,
            error_rate: args.mock_error_rate,
            ..Default::default()
        });

        let config = Config {
            server_url: args.server_url.unwrap_or_else(|| default_url.to_string()),
            model: args.model.unwrap_or_else(|| default_model.to_string()),
            api_key: args.api_key.filter(|key| !key.is_empty()),
            concurrent_requests: args.concurrent_requests.unwrap_or(default_concurrency),
            total_requests: args.total_requests.unwrap_or(default_total),
            request_timeout: Duration::from_secs(args.request_timeout),
            mode,
            context_size: args.context_size,
            max_tokens: args.max_tokens,
            temperature: args.temperature,
            prompt_style,
            fixed_prefix: args.fixed_prefix,
            seed: args.seed,
            sample_size: args.sample_size,
            json_output: args.json,
            log_level: args.log_level,
            log_format: parse_log_format(&args.log_format),
            mock_server,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.concurrent_requests == 0 {
            return Err(invalid("concurrent_requests", "must be greater than 0"));
        }
        if self.total_requests == 0 {
            return Err(invalid("total_requests", "must be greater than 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout", "must be greater than 0"));
        }
        if self.context_size == 0 {
            return Err(invalid("context_size", "must be greater than 0"));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(invalid("temperature", "must be a non-negative number"));
        }
        if let Err(e) = reqwest::Url::parse(&self.server_url) {
            return Err(invalid("server_url", &e.to_string()));
        }
        if matches!(&self.fixed_prefix, Some(prefix) if prefix.is_empty()) {
            return Err(ConfigError::MissingFixedPrefix);
        }
        if let Some(mock) = &self.mock_server {
            if !(0.0..=1.0).contains(&mock.error_rate) {
                return Err(invalid("mock_error_rate", "must be between 0.0 and 1.0"));
            }
        }
        Ok(())
    }

    /// Derive a fixed prefix for token-generation mode when none was supplied.
    ///
    /// Returns true when a prefix was generated.
    pub fn ensure_fixed_prefix(&mut self) -> bool {
        if self.mode != Mode::TokenGeneration || self.fixed_prefix.is_some() {
            return false;
        }
        let mut generator = PromptGenerator::new(self.prompt_style, self.seed);
        self.fixed_prefix = Some(generator.generate(self.context_size));
        true
    }

    /// Effective max_tokens for chat payloads in this mode
    pub fn effective_max_tokens(&self) -> u32 {
        match self.mode {
            Mode::PromptProcessing => 1,
            _ => self.max_tokens,
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}
