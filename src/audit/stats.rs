// src/audit/stats.rs
//! In-process engine counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared between the engine and its scheduler task
#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    pub submitted: AtomicU64,
    pub rejected: AtomicU64,
    pub persisted: AtomicU64,
    pub fallback: AtomicU64,
    pub dropped: AtomicU64,
    pub batches_persisted: AtomicU64,
    pub batches_failed: AtomicU64,
    pub flush_cycles: AtomicU64,
    pub cycle_panics: AtomicU64,
}

impl EngineCounters {
    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        EngineStats {
            records_submitted: load(&self.submitted),
            records_rejected: load(&self.rejected),
            records_persisted: load(&self.persisted),
            records_fallback: load(&self.fallback),
            records_dropped: load(&self.dropped),
            batches_persisted: load(&self.batches_persisted),
            batches_failed: load(&self.batches_failed),
            flush_cycles: load(&self.flush_cycles),
            cycle_panics: load(&self.cycle_panics),
        }
    }
}

/// Engine statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Records accepted into the buffer
    pub records_submitted: u64,

    /// Records refused because the buffer cap was reached
    pub records_rejected: u64,

    /// Records written to the durable store
    pub records_persisted: u64,

    /// Records written to the fallback log
    pub records_fallback: u64,

    /// Records lost because both the store and the fallback log failed
    pub records_dropped: u64,

    pub batches_persisted: u64,
    pub batches_failed: u64,

    /// Completed flush cycles (interval, threshold, manual and shutdown)
    pub flush_cycles: u64,

    /// Flush cycles aborted by a panic
    pub cycle_panics: u64,
}

impl EngineStats {
    /// Records that have left the engine one way or another
    pub fn records_settled(&self) -> u64 {
        self.records_persisted + self.records_fallback + self.records_dropped
    }

    pub fn avg_persisted_batch_size(&self) -> u64 {
        if self.batches_persisted == 0 {
            0
        } else {
            self.records_persisted / self.batches_persisted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_derived_values() {
        let counters = EngineCounters::default();
        EngineCounters::add(&counters.persisted, 10);
        EngineCounters::add(&counters.batches_persisted, 4);
        EngineCounters::add(&counters.fallback, 3);
        EngineCounters::add(&counters.dropped, 1);

        let stats = counters.snapshot();
        assert_eq!(stats.records_settled(), 14);
        assert_eq!(stats.avg_persisted_batch_size(), 2);
    }

    #[test]
    fn test_empty_averages() {
        assert_eq!(EngineStats::default().avg_persisted_batch_size(), 0);
    }
}
