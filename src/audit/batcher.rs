// src/audit/batcher.rs
//! Batch formation on top of the audit buffer

use crate::audit::buffer::AuditBuffer;
use crate::audit::record::AuditRecord;
use std::sync::Arc;
use ulid::Ulid;

/// An ordered group of records drained together.
///
/// Owned by exactly one stage at a time; it moves from the batcher to the
/// persister and, on failure, on to the fallback writer.
#[derive(Debug)]
pub struct Batch {
    id: Ulid,
    records: Vec<AuditRecord>,
}

impl Batch {
    pub fn new(records: Vec<AuditRecord>) -> Self {
        Self {
            id: Ulid::new(),
            records,
        }
    }

    /// Identifier used to correlate log lines for this batch
    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<AuditRecord> {
        self.records
    }
}

/// Drains the buffer into batches of at most `batch_size` records
pub struct Batcher {
    buffer: Arc<AuditBuffer>,
    batch_size: usize,
}

impl Batcher {
    /// `batch_size` is clamped to at least one record
    pub fn new(buffer: Arc<AuditBuffer>, batch_size: usize) -> Self {
        Self {
            buffer,
            batch_size: batch_size.max(1),
        }
    }

    /// Form the next batch, or `None` when there is nothing to do
    pub fn next_batch(&self) -> Option<Batch> {
        let records = self.buffer.drain(self.batch_size);
        if records.is_empty() {
            None
        } else {
            Some(Batch::new(records))
        }
    }

    /// Whether at least one full batch is waiting
    pub fn has_full_batch(&self) -> bool {
        self.buffer.len() >= self.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}
