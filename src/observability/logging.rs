// src/observability/logging.rs
//! Tracing subscriber setup

use crate::utils::config::LogFormat;
use crate::utils::errors::{EngineError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging to stderr.
///
/// - `LogFormat::Json`: flattened JSON (production, log aggregator compatible)
/// - `LogFormat::Text`: human-readable output (development)
///
/// `RUST_LOG` wins over `level` when set. Fails if a global subscriber is
/// already installed.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(level)?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    installed.map_err(|e| EngineError::Observability(format!("tracing init failed: {}", e)))
}

fn default_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| EngineError::Observability(format!("invalid log level {:?}: {}", level, e)))
}
