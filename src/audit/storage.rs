// src/audit/storage.rs
//! SQLite audit store
//!
//! Each batch opens its own connection, inserts inside one transaction and
//! closes the connection again, so nothing is held across flush cycles.
//! rusqlite is blocking, so the work runs on tokio's blocking pool.
//!
//! A cancelled insert interrupts the connection and closes its commit gate.
//! The worker checks the gate under the same lock it commits with, so a
//! cancelled batch is either fully committed before the cancel landed or
//! rolled back; it never commits afterwards.

use crate::audit::persister::AuditStore;
use crate::audit::record::AuditRecord;
use crate::utils::config::StorageConfig;
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, InterruptHandle, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS audit_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        actor TEXT NOT NULL,
        origin TEXT,
        method TEXT NOT NULL CHECK (length(method) > 0),
        path TEXT NOT NULL CHECK (length(path) > 0),
        payload TEXT,
        status INTEGER NOT NULL,
        duration_ms INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp);
"#;

const INSERT: &str = r#"
    INSERT INTO audit_logs (timestamp, actor, origin, method, path, payload, status, duration_ms)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
"#;

/// Audit store backed by a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteAuditStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteAuditStore {
    /// Open (creating if needed) the database and its schema
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let store = Self {
            path: config.database_path.clone(),
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
        };

        if let Some(parent) = store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::StorageFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        store
            .with_connection(|conn| {
                conn.execute_batch(SCHEMA).map_err(|e| {
                    EngineError::StorageFailed(format!("Schema creation failed: {}", e))
                })
            })
            .await?;

        info!("Audit store initialized at {:?}", store.path);

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of persisted records
    pub async fn count(&self) -> Result<u64> {
        self.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM audit_logs", [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(|e| EngineError::StorageFailed(format!("Count query failed: {}", e)))
        })
        .await
    }

    /// All persisted records in insertion order
    pub async fn list_records(&self) -> Result<Vec<AuditRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT timestamp, actor, origin, method, path, payload, status, duration_ms \
                     FROM audit_logs ORDER BY id",
                )
                .map_err(|e| {
                    EngineError::StorageFailed(format!("Query preparation failed: {}", e))
                })?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(StoredRow {
                        timestamp: row.get(0)?,
                        actor: row.get(1)?,
                        origin: row.get(2)?,
                        method: row.get(3)?,
                        path: row.get(4)?,
                        payload: row.get(5)?,
                        status: row.get(6)?,
                        duration_ms: row.get(7)?,
                    })
                })
                .map_err(|e| EngineError::StorageFailed(format!("Query execution failed: {}", e)))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    EngineError::StorageFailed(format!("Result collection failed: {}", e))
                })?;

            rows.into_iter().map(StoredRow::into_record).collect()
        })
        .await
    }

    /// Run `f` on a fresh connection in the blocking pool
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;

        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&path).map_err(|e| {
                EngineError::StorageFailed(format!("Failed to open database: {}", e))
            })?;
            conn.busy_timeout(busy_timeout).map_err(|e| {
                EngineError::StorageFailed(format!("Failed to set busy timeout: {}", e))
            })?;

            f(&mut conn)
        })
        .await
        .map_err(|e| EngineError::TaskFailed(format!("SQLite worker failed: {}", e)))?
    }
}

/// Commit permission shared between an insert worker and its caller
#[derive(Default)]
struct CommitGate {
    state: Mutex<GateState>,
}

#[derive(Default)]
struct GateState {
    abandoned: bool,
    interrupt: Option<InterruptHandle>,
}

impl CommitGate {
    /// Register the worker's connection; false if the caller already gave up
    fn arm(&self, interrupt: InterruptHandle) -> bool {
        let mut state = self.state.lock();
        if state.abandoned {
            return false;
        }
        state.interrupt = Some(interrupt);
        true
    }

    /// Forbid any later commit and interrupt the running statement
    fn abandon(&self) {
        let mut state = self.state.lock();
        state.abandoned = true;
        if let Some(interrupt) = &state.interrupt {
            interrupt.interrupt();
        }
    }

    fn commit(&self, tx: Transaction<'_>) -> Result<()> {
        let state = self.state.lock();
        if state.abandoned {
            // dropping the transaction rolls it back
            return Err(abandoned());
        }
        tx.commit()
            .map_err(|e| EngineError::StorageFailed(format!("Failed to commit batch: {}", e)))
    }
}

fn abandoned() -> EngineError {
    EngineError::StorageFailed("Insert abandoned before commit".to_string())
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn insert_batch(
        &self,
        records: &[AuditRecord],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let records = records.to_vec();
        let count = records.len();
        let gate = Arc::new(CommitGate::default());
        let worker_gate = Arc::clone(&gate);

        let worker = self.with_connection(move |conn| {
            if !worker_gate.arm(conn.get_interrupt_handle()) {
                return Err(abandoned());
            }

            let tx = conn.transaction().map_err(|e| {
                EngineError::StorageFailed(format!("Failed to begin transaction: {}", e))
            })?;

            {
                let mut stmt = tx.prepare_cached(INSERT).map_err(|e| {
                    EngineError::StorageFailed(format!("Insert preparation failed: {}", e))
                })?;

                for record in &records {
                    stmt.execute(params![
                        record.timestamp().to_rfc3339_opts(SecondsFormat::Nanos, true),
                        record.actor(),
                        record.origin(),
                        record.method(),
                        record.path(),
                        record.payload(),
                        record.status(),
                        i64::try_from(record.duration_ms()).unwrap_or(i64::MAX),
                    ])
                    .map_err(|e| EngineError::StorageFailed(format!("Insert failed: {}", e)))?;
                }
            }

            worker_gate.commit(tx)
        });
        tokio::pin!(worker);

        tokio::select! {
            outcome = &mut worker => outcome?,
            _ = cancel.cancelled() => {
                gate.abandon();
                // wait for the worker to roll back, or to report its earlier commit
                worker.await?
            }
        }

        debug!("Inserted {} audit records", count);
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

struct StoredRow {
    timestamp: String,
    actor: String,
    origin: Option<String>,
    method: String,
    path: String,
    payload: Option<String>,
    status: u16,
    duration_ms: i64,
}

impl StoredRow {
    fn into_record(self) -> Result<AuditRecord> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| EngineError::StorageFailed(format!("Bad stored timestamp: {}", e)))?
            .with_timezone(&Utc);

        let mut pending = AuditRecord::begin(self.method, self.path)
            .received_at(timestamp)
            .actor(self.actor);
        if let Some(origin) = self.origin {
            pending = pending.origin(origin);
        }
        if let Some(payload) = self.payload {
            pending = pending.payload(payload);
        }

        let duration = Duration::from_millis(u64::try_from(self.duration_ms).unwrap_or(0));
        Ok(pending.finish_with_duration(self.status, duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::batcher::Batch;
    use crate::audit::persister::Persister;
    use crate::audit::test_support::{paths, record};
    use std::sync::mpsc;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> StorageConfig {
        StorageConfig {
            database_path: dir.join("nested").join("audit.db"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_store_creation() {
        let dir = tempdir().unwrap();
        let store = SqliteAuditStore::open(&config_in(dir.path())).await.unwrap();

        assert!(store.path().exists());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_and_list_preserves_order_and_fields() {
        let dir = tempdir().unwrap();
        let store = SqliteAuditStore::open(&config_in(dir.path())).await.unwrap();

        let detailed = AuditRecord::begin("POST", "/api/test")
            .actor("alice")
            .origin("192.168.1.10")
            .payload("\"hello\"")
            .finish_with_duration(201, Duration::from_millis(42));

        store
            .insert_batch(&[record("/a"), detailed.clone()], &CancellationToken::new())
            .await
            .unwrap();
        store
            .insert_batch(&[record("/c")], &CancellationToken::new())
            .await
            .unwrap();

        let stored = store.list_records().await.unwrap();
        assert_eq!(paths(&stored), vec!["/a", "/api/test", "/c"]);
        assert_eq!(stored[1], detailed);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_constraint_violation_rolls_back_whole_batch() {
        let dir = tempdir().unwrap();
        let store = SqliteAuditStore::open(&config_in(dir.path())).await.unwrap();

        let invalid = AuditRecord::begin("", "/no-method").finish(200);
        let result = store
            .insert_batch(
                &[record("/ok-1"), invalid, record("/ok-2")],
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(EngineError::StorageFailed(_))));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_table_is_storage_failure() {
        let dir = tempdir().unwrap();
        let store = SqliteAuditStore::open(&config_in(dir.path())).await.unwrap();

        Connection::open(store.path())
            .unwrap()
            .execute_batch("DROP TABLE audit_logs")
            .unwrap();

        let err = store
            .insert_batch(&[record("/a")], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_store_failure());
    }

    #[tokio::test]
    async fn test_cancelled_insert_stores_nothing() {
        let dir = tempdir().unwrap();
        let store = SqliteAuditStore::open(&config_in(dir.path())).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store.insert_batch(&[record("/a")], &cancel).await.unwrap_err();
        assert!(err.is_store_failure());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_insert_never_commits_late() {
        let dir = tempdir().unwrap();
        let store = SqliteAuditStore::open(&config_in(dir.path())).await.unwrap();

        // a second writer holds the reserved lock for longer than the timeout
        let (locked_tx, locked_rx) = mpsc::channel();
        let db_path = store.path().to_path_buf();
        let blocker = std::thread::spawn(move || {
            let conn = Connection::open(db_path).unwrap();
            conn.execute_batch("BEGIN IMMEDIATE").unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(500));
            conn.execute_batch("COMMIT").unwrap();
        });
        tokio::task::spawn_blocking(move || locked_rx.recv().unwrap())
            .await
            .unwrap();

        let persister = Persister::new(Arc::new(store.clone()))
            .with_timeout(Some(Duration::from_millis(100)));
        let failure = persister
            .persist(Batch::new(vec![record("/contended")]))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, EngineError::PersistTimeout(_)));

        tokio::task::spawn_blocking(move || blocker.join().unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // the batch belongs to the fallback path alone
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
