// src/audit/persister.rs
//! Batch persistence against the durable store
//!
//! A batch is either stored whole or handed back untouched; retrying is the
//! fallback path's job, never this layer's.
//!
//! The persist timeout is cooperative. When it expires the store's cancel
//! token fires and the persister waits for the store's real answer: a store
//! that had already committed reports success, so a batch is never both
//! stored and handed to the fallback log.

use crate::audit::batcher::Batch;
use crate::audit::record::AuditRecord;
use crate::observability;
use crate::utils::errors::{panic_message, EngineError, Result};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use ulid::Ulid;

/// Durable bulk-insert target for audit records
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert every record in order, or none of them.
    ///
    /// Once `cancel` fires the store must not commit anything it has not
    /// committed yet and should return an error promptly. A batch that was
    /// already committed still returns `Ok`.
    async fn insert_batch(
        &self,
        records: &[AuditRecord],
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Short name used in log lines
    fn name(&self) -> &str {
        "store"
    }
}

/// Outcome of a successful persist
#[derive(Debug, Clone)]
pub struct PersistReport {
    pub batch_id: Ulid,
    pub records: usize,
    pub elapsed: Duration,
}

/// A failed persist, carrying the batch back to the caller
#[derive(Debug)]
pub struct PersistFailure {
    pub batch: Batch,
    pub error: EngineError,
}

/// Writes batches to an [`AuditStore`]
pub struct Persister {
    store: Arc<dyn AuditStore>,
    timeout: Option<Duration>,
}

impl Persister {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            timeout: None,
        }
    }

    /// Cancel inserts that take longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Persist one batch as a unit.
    ///
    /// A store that panics is treated like one that failed, so the batch
    /// still reaches the fallback log.
    pub async fn persist(&self, batch: Batch) -> std::result::Result<PersistReport, PersistFailure> {
        let start = Instant::now();

        let cancel = CancellationToken::new();

        let caught = {
            let insert =
                AssertUnwindSafe(self.store.insert_batch(batch.records(), &cancel)).catch_unwind();
            tokio::pin!(insert);

            match self.timeout {
                Some(limit) => tokio::select! {
                    caught = &mut insert => caught,
                    _ = tokio::time::sleep(limit) => {
                        warn!(
                            "Batch {} exceeded the {:?} persist timeout; cancelling {} insert",
                            batch.id(),
                            limit,
                            self.store.name()
                        );
                        cancel.cancel();
                        insert
                            .await
                            .map(|outcome| outcome.map_err(|_| EngineError::PersistTimeout(limit)))
                    }
                },
                None => insert.await,
            }
        };
        let outcome = caught.unwrap_or_else(|panic| {
            Err(EngineError::StorageFailed(format!(
                "{} store panicked: {}",
                self.store.name(),
                panic_message(panic.as_ref())
            )))
        });

        let elapsed = start.elapsed();

        match outcome {
            Ok(()) => {
                debug!(
                    "Persisted batch {} ({} records) to {} in {:?}",
                    batch.id(),
                    batch.len(),
                    self.store.name(),
                    elapsed
                );
                observability::record_persist_success(batch.len(), elapsed);

                Ok(PersistReport {
                    batch_id: batch.id(),
                    records: batch.len(),
                    elapsed,
                })
            }
            Err(error) => {
                warn!(
                    batch_id = %batch.id(),
                    records = batch.len(),
                    store = self.store.name(),
                    "Failed to persist audit batch: {}",
                    error
                );
                observability::record_persist_failure(elapsed);

                Err(PersistFailure { batch, error })
            }
        }
    }
}
