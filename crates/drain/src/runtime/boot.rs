//! Boot — tracing init and configuration load.

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{DrainConfig, LogFormat, LoggingConfig};

/// Initialise tracing, then load, validate and report the configuration.
pub fn boot() -> Result<DrainConfig> {
    // Phase 1: thread-local subscriber so config loading can log
    let basic_tracing = init_tracing_basic();

    info!("Starting syslog drain v{}", env!("CARGO_PKG_VERSION"));

    let config = DrainConfig::load().context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    // Phase 2: free the thread-local slot and install the configured global subscriber
    drop(basic_tracing);
    init_tracing_from_config(&config.logging);

    config.report();
    Ok(config)
}

/// Basic tracing init. Uses RUST_LOG or a sensible default.
fn init_tracing_basic() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,drain=debug"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_default(subscriber)
}

/// Global subscriber from configuration.
///
/// Diagnostics always go to stderr; stdout may carry the entry stream.
fn init_tracing_from_config(logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Prefer RUST_LOG env var, fall back to config level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}
