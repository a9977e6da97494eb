// src/audit/buffer.rs
//! Unbounded MPMC audit buffer
//!
//! Producers push onto a lock-free `SegQueue` and never wait on each other.
//! Removal happens only through [`AuditBuffer::drain`], which holds a drain
//! lock for its whole pop loop, so two concurrent drains can neither split
//! nor duplicate a record and each drain returns a contiguous FIFO run.

use crate::audit::record::AuditRecord;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Concurrency-safe FIFO of completed audit records
pub struct AuditBuffer {
    /// Pending records
    queue: SegQueue<AuditRecord>,

    /// Serializes drains
    drain_lock: Mutex<()>,

    /// Optional soft cap (unbounded when `None`)
    capacity: Option<usize>,

    /// Push counter
    push_count: AtomicU64,

    /// Drained record counter
    drain_count: AtomicU64,

    /// Rejected counter (cap reached)
    reject_count: AtomicU64,
}

impl AuditBuffer {
    /// Create an unbounded buffer
    pub fn new() -> Self {
        Self::with_capacity_limit(None)
    }

    /// Create a buffer that rejects pushes once `capacity` records are pending.
    ///
    /// The cap is soft: concurrent producers may overshoot it by at most one
    /// record each.
    pub fn with_capacity_limit(capacity: Option<usize>) -> Self {
        Self {
            queue: SegQueue::new(),
            drain_lock: Mutex::new(()),
            capacity,
            push_count: AtomicU64::new(0),
            drain_count: AtomicU64::new(0),
            reject_count: AtomicU64::new(0),
        }
    }

    /// Append a record to the tail, returning the buffer length after the push.
    ///
    /// Only fails when a capacity cap is configured and reached, in which case
    /// the record is handed back.
    pub fn push(&self, record: AuditRecord) -> Result<usize, AuditRecord> {
        if let Some(capacity) = self.capacity {
            if self.queue.len() >= capacity {
                self.reject_count.fetch_add(1, Ordering::Relaxed);
                return Err(record);
            }
        }

        self.queue.push(record);
        self.push_count.fetch_add(1, Ordering::Relaxed);

        Ok(self.queue.len())
    }

    /// Remove up to `max` records from the head, in insertion order
    pub fn drain(&self, max: usize) -> Vec<AuditRecord> {
        let _guard = self.drain_lock.lock();

        let mut records = Vec::with_capacity(max.min(self.queue.len()));
        while records.len() < max {
            match self.queue.pop() {
                Some(record) => records.push(record),
                None => break,
            }
        }

        self.drain_count
            .fetch_add(records.len() as u64, Ordering::Relaxed);

        records
    }

    /// Check if the buffer is empty (may be stale under concurrent pushes)
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Current number of pending records
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Get buffer statistics
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            push_count: self.push_count.load(Ordering::Relaxed),
            drain_count: self.drain_count.load(Ordering::Relaxed),
            reject_count: self.reject_count.load(Ordering::Relaxed),
            current_size: self.queue.len(),
            capacity: self.capacity,
        }
    }
}

impl Default for AuditBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffer statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferStats {
    /// Total records accepted
    pub push_count: u64,

    /// Total records removed by drains
    pub drain_count: u64,

    /// Total records rejected (cap reached)
    pub reject_count: u64,

    /// Current buffer size
    pub current_size: usize,

    /// Configured cap, if any
    pub capacity: Option<usize>,
}

impl BufferStats {
    /// Fill percentage of a capped buffer
    pub fn fill_percentage(&self) -> Option<f64> {
        self.capacity
            .map(|cap| (self.current_size as f64 / cap as f64) * 100.0)
    }
}
