// src/observability/exporter.rs
//! Prometheus recorder installation

use super::{
    BATCHES, BUFFER_DEPTH, FLUSH_CYCLES, PERSIST_DURATION, RECORDS_DROPPED, RECORDS_FALLBACK,
    RECORDS_PERSISTED, RECORDS_REJECTED, RECORDS_SUBMITTED,
};
use crate::utils::errors::{EngineError, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tracing::{debug, info};

/// Install the global Prometheus recorder.
///
/// With `listen_addr` set, metrics are served at `http://{addr}/metrics`.
/// Without it no recorder is installed and metric updates are discarded.
/// Must be called from within a Tokio runtime.
pub fn init_metrics(listen_addr: Option<SocketAddr>) -> Result<()> {
    let Some(addr) = listen_addr else {
        debug!("No metrics listener configured; metrics disabled");
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::Observability(format!("metrics exporter failed: {}", e)))?;

    describe_metrics();
    info!("Prometheus metrics listening on {}", addr);

    Ok(())
}

/// Install a recorder without a listener and return a handle for rendering
pub fn install_in_process() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| EngineError::Observability(format!("metrics recorder failed: {}", e)))?;

    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(
        RECORDS_SUBMITTED,
        Unit::Count,
        "Audit records accepted into the buffer"
    );
    describe_counter!(
        RECORDS_REJECTED,
        Unit::Count,
        "Audit records refused because the buffer cap was reached"
    );
    describe_counter!(
        RECORDS_PERSISTED,
        Unit::Count,
        "Audit records written to the durable store"
    );
    describe_counter!(
        RECORDS_FALLBACK,
        Unit::Count,
        "Audit records written to the fallback log"
    );
    describe_counter!(
        RECORDS_DROPPED,
        Unit::Count,
        "Audit records lost after store and fallback failures"
    );
    describe_counter!(BATCHES, Unit::Count, "Persist attempts by outcome");
    describe_counter!(FLUSH_CYCLES, Unit::Count, "Completed flush cycles by trigger");
    describe_histogram!(
        PERSIST_DURATION,
        Unit::Seconds,
        "Time spent in a single batch insert"
    );
    describe_gauge!(BUFFER_DEPTH, Unit::Count, "Records waiting in the buffer");
}
