//! Proxy Sieve - Entry Point
//!
//! Runs one verification job configured from the environment.

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use proxy_sieve::config::LogConfig;
use proxy_sieve::{jobs, Config};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Logging is configured from the config, so report on stderr.
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.log);
    info!(job = %config.job.name, "Starting Proxy Sieve");

    match jobs::run(&config).await {
        Ok(report) => {
            info!(
                job = %report.job,
                run_id = %report.run_id,
                accepted = report.routed.accepted,
                failed = report.failed_records(),
                "Proxy Sieve finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Job failed");
            ExitCode::FAILURE
        }
    }
}

/// Install the global subscriber; `RUST_LOG` wins over `LOG_LEVEL`
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxy_sieve={},sqlx=warn", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
