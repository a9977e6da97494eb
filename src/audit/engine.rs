// src/audit/engine.rs
//! Audit engine facade
//!
//! Owns the buffer and the flush scheduler. Producers call
//! [`AuditEngine::submit`] from any thread; persistence happens on the
//! background task started by [`AuditEngine::start`] and is finished by
//! [`AuditEngine::stop`].

use crate::audit::buffer::{AuditBuffer, BufferStats};
use crate::audit::persister::AuditStore;
use crate::audit::record::AuditRecord;
use crate::audit::scheduler::{FlushScheduler, FlushSignals, SchedulerState};
use crate::audit::stats::{EngineCounters, EngineStats};
use crate::observability;
use crate::utils::config::AuditConfig;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Where the background task is in its life
enum Runner {
    /// Built, not started yet
    Pending(FlushScheduler),

    Running(JoinHandle<()>),

    Stopped,
}

/// Buffered, batched audit log writer
pub struct AuditEngine {
    buffer: Arc<AuditBuffer>,
    batch_size: usize,
    signals: FlushSignals,
    counters: Arc<EngineCounters>,
    state: watch::Receiver<SchedulerState>,
    runner: Mutex<Runner>,

    /// Serializes `stop` so a second caller waits for the first drain
    stop_lock: tokio::sync::Mutex<()>,
}

impl AuditEngine {
    /// Create an engine writing to `store`
    pub fn new(config: &AuditConfig, store: Arc<dyn AuditStore>) -> Result<Self> {
        config.validate()?;

        let buffer = Arc::new(AuditBuffer::with_capacity_limit(config.max_buffered));
        let signals = FlushSignals::default();
        let counters = Arc::new(EngineCounters::default());

        let (scheduler, state) = FlushScheduler::new(
            config,
            Arc::clone(&buffer),
            store,
            signals.clone(),
            Arc::clone(&counters),
        );

        info!(
            "Audit engine created (batch size {}, interval {:?}, fallback {:?})",
            config.batch_size,
            config.flush_interval(),
            config.fallback_path
        );

        Ok(Self {
            buffer,
            batch_size: config.batch_size,
            signals,
            counters,
            state,
            runner: Mutex::new(Runner::Pending(scheduler)),
            stop_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Start the background flush task. Must be called inside a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut runner = self.runner.lock();

        match std::mem::replace(&mut *runner, Runner::Stopped) {
            Runner::Pending(scheduler) => {
                info!("Starting audit flush scheduler");
                *runner = Runner::Running(scheduler.spawn());
                Ok(())
            }
            previous @ Runner::Running(_) => {
                *runner = previous;
                Err(EngineError::Lifecycle("engine already started".to_string()))
            }
            Runner::Stopped => Err(EngineError::Lifecycle(
                "engine has been stopped".to_string(),
            )),
        }
    }

    /// Enqueue a completed record. Never blocks and never fails the caller.
    pub fn submit(&self, record: AuditRecord) {
        if self.state() == SchedulerState::Stopped {
            warn!(
                "Audit record for {} {} submitted after shutdown; it will not be flushed",
                record.method(),
                record.path()
            );
        }

        if let Err(e) = self.try_submit(record) {
            warn!("Audit record rejected: {}", e);
        }
    }

    /// Enqueue a record, reporting rejection when the buffer cap is reached
    pub fn try_submit(&self, record: AuditRecord) -> Result<()> {
        match self.buffer.push(record) {
            Ok(len) => {
                EngineCounters::add(&self.counters.submitted, 1);
                observability::record_submitted();
                observability::set_buffer_depth(len);

                if len >= self.batch_size {
                    self.signals.threshold.notify_one();
                }
                Ok(())
            }
            Err(_rejected) => {
                EngineCounters::add(&self.counters.rejected, 1);
                observability::record_rejected();
                Err(EngineError::BufferFull(
                    self.buffer.capacity().unwrap_or_default(),
                ))
            }
        }
    }

    /// Ask the scheduler to drain now instead of waiting for the timer
    pub fn flush_now(&self) {
        self.signals.manual.notify_one();
    }

    /// Stop the scheduler, draining every buffered record first.
    ///
    /// Safe to call more than once; later calls return once the first drain
    /// has finished.
    pub async fn stop(&self) -> Result<()> {
        let _serial = self.stop_lock.lock().await;

        self.signals.shutdown.cancel();
        let runner = std::mem::replace(&mut *self.runner.lock(), Runner::Stopped);

        match runner {
            Runner::Running(handle) => {
                info!("Stopping audit engine ({} records pending)", self.pending());
                handle
                    .await
                    .map_err(|e| EngineError::TaskFailed(format!("flush scheduler: {}", e)))?;
            }
            Runner::Pending(scheduler) => {
                info!("Audit engine stopped before start; draining inline");
                scheduler.finish().await;
            }
            Runner::Stopped => {}
        }

        Ok(())
    }

    /// Current scheduler state
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Receiver that observes every scheduler state change
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    /// Records buffered and not yet drained
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl Drop for AuditEngine {
    fn drop(&mut self) {
        if let Runner::Running(_) = &*self.runner.get_mut() {
            warn!(
                "Audit engine dropped without stop(); draining {} buffered records in the background",
                self.buffer.len()
            );
            // the detached task still runs its final drain while the runtime lives
            self.signals.shutdown.cancel();
        }
    }
}
