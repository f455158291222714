use anyhow::Result;

use llm_stress::config::{Config, LogFormat};
use llm_stress::mock_server;
use llm_stress::{RunReport, StressRunner};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let mut config = Config::load()?;

    // Initialize logging with a configured level; RUST_LOG takes precedence
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }

    if config.ensure_fixed_prefix() {
        tracing::info!(
            context_size = config.context_size,
            style = %config.prompt_style,
            "Generated fixed prefix for token generation"
        );
    }

    // Keep the mock server alive until the run finishes; the banner shows its URL
    let mut mock = mock_server::start_for(&mut config).await?;

    if !config.json_output {
        print_startup_banner(&config);
    }

    let outcome = StressRunner::from_config(config.clone())?.run().await;
    let report = RunReport::from_outcome(&config, &outcome);

    if config.json_output {
        println!("{}", report.to_json());
    } else {
        report.print_table();
    }

    if let Some(server) = &mut mock {
        tracing::debug!(
            peak_in_flight = server.peak_in_flight(),
            requests = server.requests_received(),
            "Stopping mock inference server"
        );
        server.stop();
    }

    Ok(())
}

/// Print startup banner
fn print_startup_banner(config: &Config) {
    let banner = r#"
╔═══════════════════════════════════════════════════════════╗
║                                                           ║
║                  LLM Stress - load tester                 ║
║                                                           ║
║     Concurrent load against chat and embedding APIs       ║
║                                                           ║
╚═══════════════════════════════════════════════════════════╝
"#;

    println!("{}", banner);
    println!("  Version:     {}", env!("CARGO_PKG_VERSION"));
    println!("  Mode:        {}", config.mode.label());
    println!("  Server:      {}", config.server_url);
    println!("  Model:       {}", config.model);
    println!(
        "  Load:        {} requests, {} concurrent",
        config.total_requests, config.concurrent_requests
    );
    println!("  Context:     {} tokens", config.context_size);
    if config.mode.is_chat() {
        println!("  Max Tokens:  {}", config.effective_max_tokens());
    }
    if let Some(mock) = &config.mock_server {
        println!(
            "  Mock Server: enabled ({}ms latency, {:.0}% errors)",
            mock.latency_ms,
            mock.error_rate * 100.0
        );
    }
    println!();
}
