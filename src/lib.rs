// LLM Stress - Library root

pub mod config;
pub mod error;
pub mod executor;
pub mod http_client;
pub mod metrics;
pub mod mock_server;
pub mod models;
pub mod prompt;
pub mod report;
pub mod runner;
pub mod stats;

pub use config::{Config, Mode};
pub use error::{ConfigError, RequestError};
pub use executor::RequestExecutor;
pub use http_client::{HttpTransport, Transport};
pub use metrics::{RequestResult, RequestStatus};
pub use report::RunReport;
pub use runner::{RunOutcome, StressRunner};
pub use stats::{aggregate, AggregateStatistics};
