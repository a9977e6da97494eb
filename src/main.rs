// src/main.rs
//! Audit Log Engine
//!
//! Reads newline-delimited JSON audit records from stdin and persists them
//! through the buffered engine until stdin closes or a shutdown signal
//! arrives. The final drain always completes before the process exits.

use anyhow::{Context, Result};
use auditlog_engine::observability::{init_metrics, init_tracing};
use auditlog_engine::{AuditEngine, AuditRecord, EngineConfig, SqliteAuditStore};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first; it drives logging
    let config = EngineConfig::load().context("failed to load configuration")?;

    init_tracing(&config.logging.level, config.logging.format)?;
    init_metrics(config.metrics.listen_addr)?;

    info!("Starting Audit Log Engine v{}", auditlog_engine::VERSION);
    info!("Configuration loaded: {:?}", config);

    let store = Arc::new(
        SqliteAuditStore::open(&config.storage)
            .await
            .context("failed to open audit store")?,
    );

    let engine = AuditEngine::new(&config.audit, store)?;
    engine.start()?;

    let shutdown = create_shutdown_token();
    let ingested = ingest_stdin(&engine, &shutdown).await;

    info!(
        "Input finished after {} records; draining {} pending",
        ingested,
        engine.pending()
    );
    engine.stop().await?;

    let stats = engine.stats();
    info!(
        "Audit engine stopped: {} persisted, {} fallback, {} dropped",
        stats.records_persisted, stats.records_fallback, stats.records_dropped
    );

    Ok(())
}

/// Submit one record per stdin line until EOF or shutdown
async fn ingest_stdin(engine: &AuditEngine, shutdown: &CancellationToken) -> u64 {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;
    let mut ingested = 0u64;

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Received shutdown signal, cleaning up...");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };
        line_no += 1;

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<AuditRecord>(&line) {
            Ok(record) => {
                engine.submit(record);
                ingested += 1;
            }
            Err(e) => warn!("Skipping malformed record on line {}: {}", line_no, e),
        }
    }

    ingested
}

/// Cancel the returned token on SIGINT or SIGTERM
fn create_shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        token_clone.cancel();
    });

    token
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
