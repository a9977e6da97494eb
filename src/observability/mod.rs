// src/observability/mod.rs
//! Structured logging and Prometheus metrics
//!
//! Metric helpers are thin wrappers over the `metrics` facade macros and are
//! no-ops until a recorder is installed with [`init_metrics`].

pub mod exporter;
pub mod logging;

pub use exporter::{init_metrics, install_in_process};
pub use logging::init_tracing;

use metrics::{counter, gauge, histogram};
use std::time::Duration;

pub const RECORDS_SUBMITTED: &str = "auditlog_records_submitted_total";
pub const RECORDS_REJECTED: &str = "auditlog_records_rejected_total";
pub const RECORDS_PERSISTED: &str = "auditlog_records_persisted_total";
pub const RECORDS_FALLBACK: &str = "auditlog_records_fallback_total";
pub const RECORDS_DROPPED: &str = "auditlog_records_dropped_total";
pub const BATCHES: &str = "auditlog_batches_total";
pub const FLUSH_CYCLES: &str = "auditlog_flush_cycles_total";
pub const PERSIST_DURATION: &str = "auditlog_persist_duration_seconds";
pub const BUFFER_DEPTH: &str = "auditlog_buffer_depth";

pub(crate) fn record_submitted() {
    counter!(RECORDS_SUBMITTED).increment(1);
}

pub(crate) fn record_rejected() {
    counter!(RECORDS_REJECTED).increment(1);
}

pub(crate) fn record_persist_success(records: usize, elapsed: Duration) {
    counter!(RECORDS_PERSISTED).increment(records as u64);
    counter!(BATCHES, "outcome" => "persisted").increment(1);
    histogram!(PERSIST_DURATION, "outcome" => "persisted").record(elapsed.as_secs_f64());
}

pub(crate) fn record_persist_failure(elapsed: Duration) {
    counter!(BATCHES, "outcome" => "failed").increment(1);
    histogram!(PERSIST_DURATION, "outcome" => "failed").record(elapsed.as_secs_f64());
}

pub(crate) fn record_fallback(records: usize) {
    counter!(RECORDS_FALLBACK).increment(records as u64);
}

pub(crate) fn record_dropped(records: usize) {
    counter!(RECORDS_DROPPED).increment(records as u64);
}

pub(crate) fn record_flush_cycle(trigger: &'static str) {
    counter!(FLUSH_CYCLES, "trigger" => trigger).increment(1);
}

pub(crate) fn set_buffer_depth(depth: usize) {
    gauge!(BUFFER_DEPTH).set(depth as f64);
}
