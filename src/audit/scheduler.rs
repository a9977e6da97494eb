// src/audit/scheduler.rs
//! Background flush loop
//!
//! One task per engine. It sleeps in `Idle` until one of three things
//! happens, then runs a flush cycle in `Draining`:
//!
//! - **interval**: the timer fired and the buffer holds records; drains
//!   everything, up to `max_batches_per_flush` batches
//! - **threshold**: a producer pushed the buffer to `batch_size`; drains full
//!   batches only, leaving a partial tail for the timer
//! - **manual**: [`AuditEngine::flush_now`](crate::audit::AuditEngine::flush_now);
//!   same as interval
//!
//! Cancelling the shutdown token moves the loop to `ShuttingDown`, where it
//! drains to empty with no batch limit and then settles in `Stopped`.
//!
//! ```text
//!            timer / threshold / manual
//!   Idle ─────────────────────────────────▶ Draining
//!    ▲                                         │
//!    └──────────── cycle complete ─────────────┘
//!   Idle | Draining ── shutdown ──▶ ShuttingDown ── drained ──▶ Stopped
//! ```
//!
//! Nothing escapes the loop: store failures are routed to the fallback log,
//! fallback failures are logged, and a panicking cycle is logged and the
//! loop carries on with the next trigger.

use crate::audit::batcher::{Batch, Batcher};
use crate::audit::buffer::AuditBuffer;
use crate::audit::fallback::FallbackWriter;
use crate::audit::persister::{AuditStore, PersistFailure, Persister};
use crate::audit::stats::EngineCounters;
use crate::observability;
use crate::utils::config::AuditConfig;
use crate::utils::errors::panic_message;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Flush scheduler states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for a trigger
    Idle,

    /// Running a flush cycle
    Draining,

    /// Final drain in progress
    ShuttingDown,

    /// Terminal; no further drains happen
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Draining => "draining",
            SchedulerState::ShuttingDown => "shutting_down",
            SchedulerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What woke the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Interval,
    Threshold,
    Manual,
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Interval => "interval",
            FlushTrigger::Threshold => "threshold",
            FlushTrigger::Manual => "manual",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

/// Wake-up channels shared between the engine and its scheduler
#[derive(Debug, Clone, Default)]
pub struct FlushSignals {
    /// Raised by producers when the buffer reaches `batch_size`
    pub threshold: Arc<Notify>,

    /// Raised by an explicit flush request
    pub manual: Arc<Notify>,

    /// Cooperative stop signal
    pub shutdown: CancellationToken,
}

/// Totals for one flush cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub batches: usize,
    pub persisted: usize,
    pub fallback: usize,
    pub dropped: usize,
}

/// The background drain → persist → fallback loop
pub struct FlushScheduler {
    batcher: Batcher,
    persister: Persister,
    fallback: FallbackWriter,
    flush_interval: Duration,
    max_batches_per_flush: usize,
    signals: FlushSignals,
    state: watch::Sender<SchedulerState>,
    counters: Arc<EngineCounters>,
}

impl FlushScheduler {
    /// Build a scheduler in `Idle`, returning it with a state receiver
    pub(crate) fn new(
        config: &AuditConfig,
        buffer: Arc<AuditBuffer>,
        store: Arc<dyn AuditStore>,
        signals: FlushSignals,
        counters: Arc<EngineCounters>,
    ) -> (Self, watch::Receiver<SchedulerState>) {
        let (state, state_rx) = watch::channel(SchedulerState::Idle);

        let scheduler = Self {
            batcher: Batcher::new(buffer, config.batch_size),
            persister: Persister::new(store).with_timeout(config.persist_timeout()),
            fallback: FallbackWriter::new(config.fallback_path.clone(), config.fallback_format),
            flush_interval: config.flush_interval(),
            max_batches_per_flush: config.max_batches_per_flush.max(1),
            signals,
            state,
            counters,
        };

        (scheduler, state_rx)
    }

    /// Arm the timer and run the loop on a new task
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        let period = self.flush_interval;
        let mut interval = tokio::time::interval_at(first_tick(period), period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(self.run(interval))
    }

    async fn run(self, mut interval: Interval) {
        info!(
            "Flush scheduler started (batch size {}, interval {:?})",
            self.batcher.batch_size(),
            self.flush_interval
        );

        loop {
            // a cycle cut short by shutdown goes straight to the final drain
            if self.signals.shutdown.is_cancelled() {
                break;
            }
            self.set_state(SchedulerState::Idle);

            let trigger = tokio::select! {
                biased;

                _ = self.signals.shutdown.cancelled() => break,
                _ = self.signals.threshold.notified() => FlushTrigger::Threshold,
                _ = self.signals.manual.notified() => FlushTrigger::Manual,
                _ = interval.tick() => FlushTrigger::Interval,
            };

            let ready = match trigger {
                FlushTrigger::Threshold => self.batcher.has_full_batch(),
                _ => !self.batcher.is_empty(),
            };
            if !ready {
                trace!("Nothing to flush on {} trigger", trigger.as_str());
                continue;
            }

            self.set_state(SchedulerState::Draining);
            self.guarded_cycle(trigger).await;
        }

        self.finish().await;
    }

    /// Drain everything that is left and stop
    pub(crate) async fn finish(self) {
        self.set_state(SchedulerState::ShuttingDown);
        info!(
            "Flush scheduler shutting down with {} pending records",
            self.batcher.pending()
        );

        // each cycle removes at least one batch, so this terminates
        while !self.batcher.is_empty() {
            self.guarded_cycle(FlushTrigger::Shutdown).await;
        }

        self.set_state(SchedulerState::Stopped);
        info!("Flush scheduler stopped");
    }

    async fn guarded_cycle(&self, trigger: FlushTrigger) {
        let start = Instant::now();

        match AssertUnwindSafe(self.flush(trigger)).catch_unwind().await {
            Ok(summary) => {
                EngineCounters::add(&self.counters.flush_cycles, 1);
                observability::record_flush_cycle(trigger.as_str());

                if summary.batches > 0 {
                    debug!(
                        "{} flush: {} batches ({} persisted, {} fallback, {} dropped) in {:?}",
                        trigger.as_str(),
                        summary.batches,
                        summary.persisted,
                        summary.fallback,
                        summary.dropped,
                        start.elapsed()
                    );
                }
            }
            Err(panic) => {
                EngineCounters::add(&self.counters.cycle_panics, 1);
                error!(
                    "{} flush cycle panicked: {}",
                    trigger.as_str(),
                    panic_message(panic.as_ref())
                );
            }
        }

        observability::set_buffer_depth(self.batcher.pending());
    }

    /// Run one flush cycle
    pub(crate) async fn flush(&self, trigger: FlushTrigger) -> FlushSummary {
        let limit = match trigger {
            FlushTrigger::Shutdown => usize::MAX,
            _ => self.max_batches_per_flush,
        };

        let mut summary = FlushSummary::default();

        while summary.batches < limit {
            if trigger == FlushTrigger::Threshold && !self.batcher.has_full_batch() {
                break;
            }

            let Some(batch) = self.batcher.next_batch() else {
                break;
            };

            self.process(batch, &mut summary).await;
            summary.batches += 1;

            // the shutdown drain picks up whatever is left
            if trigger != FlushTrigger::Shutdown && self.signals.shutdown.is_cancelled() {
                break;
            }
        }

        if summary.batches >= limit && !self.batcher.is_empty() {
            warn!(
                "Flush cycle hit the {} batch limit with {} records still pending",
                limit,
                self.batcher.pending()
            );
        }

        summary
    }

    async fn process(&self, batch: Batch, summary: &mut FlushSummary) {
        let size = batch.len();

        let PersistFailure { batch, error } = match self.persister.persist(batch).await {
            Ok(report) => {
                EngineCounters::add(&self.counters.persisted, report.records);
                EngineCounters::add(&self.counters.batches_persisted, 1);
                summary.persisted += report.records;
                return;
            }
            Err(failure) => failure,
        };

        EngineCounters::add(&self.counters.batches_failed, 1);

        match self.fallback.write_fallback(&batch).await {
            Ok(written) => {
                warn!(
                    "Batch {} ({} records) written to fallback log {:?} after store failure: {}",
                    batch.id(),
                    written,
                    self.fallback.path(),
                    error
                );
                EngineCounters::add(&self.counters.fallback, written);
                observability::record_fallback(written);
                summary.fallback += written;
            }
            Err(fallback_error) => {
                error!(
                    batch_id = %batch.id(),
                    records = size,
                    "Audit batch dropped: store failed ({}) and fallback failed ({})",
                    error,
                    fallback_error
                );
                EngineCounters::add(&self.counters.dropped, size);
                observability::record_dropped(size);
                summary.dropped += size;
            }
        }
    }

    fn set_state(&self, next: SchedulerState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                trace!("Flush scheduler {} -> {}", current, next);
                *current = next;
                true
            }
        });
    }
}

/// Timer deadlines past this are treated as never
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Deadline of the first interval tick, saturating for huge periods
fn first_tick(period: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(period).unwrap_or_else(|| now + FAR_FUTURE)
}
