// src/lib.rs
//! Audit Log Engine Library
//!
//! Buffers per-request audit records in memory and persists them in batches
//! from a background task, so request handlers never wait on the database.
//!
//! # Architecture
//!
//! The engine is structured into three modules:
//!
//! - **audit**: Records, buffer, batching, persistence, fallback log and the
//!   flush scheduler
//! - **observability**: Tracing subscriber and Prometheus metrics
//! - **utils**: Configuration and error types
//!
//! # Example
//!
//! ```no_run
//! use auditlog_engine::{AuditEngine, AuditRecord, EngineConfig, SqliteAuditStore};
//! use std::sync::Arc;
//!
//! # async fn run() -> auditlog_engine::Result<()> {
//! let config = EngineConfig::load()?;
//! let store = Arc::new(SqliteAuditStore::open(&config.storage).await?);
//!
//! let engine = AuditEngine::new(&config.audit, store)?;
//! engine.start()?;
//!
//! engine.submit(AuditRecord::begin("GET", "/health").finish(200));
//!
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```

// Public module exports
pub mod audit;
pub mod observability;
pub mod utils;

// Re-export commonly used types
pub use audit::{AuditEngine, AuditRecord, AuditStore, SchedulerState, SqliteAuditStore};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
