// src/audit/test_support.rs
//! In-memory stores and record helpers shared by the audit tests

use crate::audit::persister::AuditStore;
use crate::audit::record::AuditRecord;
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A completed GET record for `path`
pub fn record(path: &str) -> AuditRecord {
    AuditRecord::begin("GET", path).finish_with_duration(200, Duration::from_millis(1))
}

pub fn paths(records: &[AuditRecord]) -> Vec<&str> {
    records.iter().map(|r| r.path()).collect()
}

/// Keeps every inserted batch
#[derive(Default)]
pub struct MemoryStore {
    batches: Mutex<Vec<Vec<AuditRecord>>>,
}

impl MemoryStore {
    pub fn batches(&self) -> Vec<Vec<AuditRecord>> {
        self.batches.lock().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(Vec::len).collect()
    }

    /// Paths of all stored records, flattened in insertion order
    pub fn stored_paths(&self) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .flatten()
            .map(|r| r.path().to_string())
            .collect()
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_batch(
        &self,
        records: &[AuditRecord],
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.batches.lock().push(records.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Rejects every batch, counting attempts
#[derive(Default)]
pub struct FailingStore {
    attempts: AtomicUsize,
}

impl FailingStore {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditStore for FailingStore {
    async fn insert_batch(
        &self,
        _records: &[AuditRecord],
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::StorageFailed("connection refused".to_string()))
    }
}

/// Fails while `down` is set, stores otherwise
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditStore for FlakyStore {
    async fn insert_batch(
        &self,
        records: &[AuditRecord],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(EngineError::StorageFailed("store unreachable".to_string()));
        }
        self.inner.insert_batch(records, cancel).await
    }
}

/// Takes `delay` before storing; gives up when cancelled unless told otherwise
pub struct SlowStore {
    pub inner: MemoryStore,
    delay: Duration,
    honor_cancel: bool,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::default(),
            delay,
            honor_cancel: true,
        }
    }

    /// A store whose commit cannot be stopped once started
    pub fn ignoring_cancel(delay: Duration) -> Self {
        Self {
            honor_cancel: false,
            ..Self::new(delay)
        }
    }
}

#[async_trait]
impl AuditStore for SlowStore {
    async fn insert_batch(
        &self,
        records: &[AuditRecord],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.honor_cancel {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(EngineError::StorageFailed("insert abandoned".to_string()));
                }
                _ = tokio::time::sleep(self.delay) => {}
            }
        } else {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.insert_batch(records, cancel).await
    }
}

/// Panics on the first `panics` batches, then stores normally
pub struct PanickingStore {
    pub inner: MemoryStore,
    remaining_panics: AtomicUsize,
}

impl PanickingStore {
    pub fn new(panics: usize) -> Self {
        Self {
            inner: MemoryStore::default(),
            remaining_panics: AtomicUsize::new(panics),
        }
    }
}

#[async_trait]
impl AuditStore for PanickingStore {
    async fn insert_batch(
        &self,
        records: &[AuditRecord],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let should_panic = self
            .remaining_panics
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_panic {
            panic!("store driver bug");
        }
        self.inner.insert_batch(records, cancel).await
    }
}
