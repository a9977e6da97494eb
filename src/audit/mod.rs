// src/audit/mod.rs
//! Audit record buffering, batching and persistence
//!
//! This module turns a stream of per-request audit records into bulk
//! inserts against a durable store:
//!
//! - **Record**: Immutable description of one handled request
//! - **Buffer**: Lock-free MPMC queue with serialized drains
//! - **Batcher**: Carves the buffer into FIFO batches of `batch_size`
//! - **Persister**: All-or-nothing batch insert behind the `AuditStore` trait
//! - **Storage**: SQLite implementation of `AuditStore`
//! - **Fallback**: Append-only local log for batches the store refused
//! - **Scheduler**: Background flush loop and its state machine
//! - **Engine**: Public facade (`submit`, `start`, `stop`)
//!
//! # Architecture
//!
//! ```text
//! Handler → submit() → Lock-Free Buffer ──(len ≥ batch_size)──┐
//!                           │                                 │
//!                    interval / manual                   threshold
//!                           ▼                                 │
//!                     Flush Scheduler ◀───────────────────────┘
//!                           │
//!                      Batch (FIFO)
//!                           │
//!                    AuditStore::insert_batch
//!                      │            │
//!                     ok          error / timeout / panic
//!                      │            ▼
//!                    done     Fallback Log (append)
//!                                   │
//!                                 error → logged, counted as dropped
//! ```
//!
//! # Guarantees
//!
//! - Every submitted record is persisted, written to the fallback log, or
//!   reported as dropped, exactly once
//! - Records from one producer keep their submission order across batches
//! - `stop()` returns only after the buffer is empty

pub mod batcher;
pub mod buffer;
pub mod engine;
pub mod fallback;
pub mod persister;
pub mod record;
pub mod scheduler;
pub mod stats;
pub mod storage;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use batcher::{Batch, Batcher};
pub use buffer::{AuditBuffer, BufferStats};
pub use engine::AuditEngine;
pub use fallback::{read_fallback, FallbackFormat, FallbackScan, FallbackWriter};
pub use persister::{AuditStore, PersistFailure, PersistReport, Persister};
pub use record::{AuditRecord, PendingRecord};
pub use scheduler::{FlushSummary, FlushTrigger, SchedulerState};
pub use stats::EngineStats;
pub use storage::SqliteAuditStore;
