// src/audit/fallback.rs
//! Local append-only fallback log
//!
//! Batches the store rejected are appended here, one self-contained line per
//! record, so a reader never needs more than the current line. A crash in the
//! middle of a write can leave at most the final line truncated; readers skip
//! it and nothing repairs it.
//!
//! If this write fails too the batch is lost. That is the only path on which
//! the engine drops records, and it is always logged at error level.

use crate::audit::batcher::Batch;
use crate::audit::record::AuditRecord;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Line encoding for fallback records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackFormat {
    /// One JSON object per line carrying every record field
    #[default]
    Json,

    /// `<timestamp>: <path> - <method> - <status>`
    Text,
}

/// Appends failed batches to the fallback log
#[derive(Debug, Clone)]
pub struct FallbackWriter {
    path: PathBuf,
    format: FallbackFormat,
}

impl FallbackWriter {
    pub fn new(path: impl Into<PathBuf>, format: FallbackFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FallbackFormat {
        self.format
    }

    /// Encode one record as a single line (without the trailing newline)
    pub fn encode_line(&self, record: &AuditRecord) -> Result<String> {
        match self.format {
            FallbackFormat::Json => Ok(serde_json::to_string(record)?),
            FallbackFormat::Text => Ok(format!(
                "{}: {} - {} - {}",
                record.timestamp().to_rfc3339(),
                single_line(record.path()),
                single_line(record.method()),
                record.status()
            )),
        }
    }

    /// Append every record of `batch`, returning the number of lines written
    pub async fn write_fallback(&self, batch: &Batch) -> Result<usize> {
        let mut buf = String::new();
        for record in batch.records() {
            buf.push_str(&self.encode_line(record)?);
            buf.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.failed("open", e))?;

        // one write per batch keeps concurrent appenders from interleaving lines
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| self.failed("append to", e))?;
        file.flush().await.map_err(|e| self.failed("flush", e))?;
        file.sync_data().await.map_err(|e| self.failed("sync", e))?;

        debug!(
            "Appended batch {} ({} records) to fallback log {:?}",
            batch.id(),
            batch.len(),
            self.path
        );

        Ok(batch.len())
    }

    fn failed(&self, action: &str, err: std::io::Error) -> EngineError {
        EngineError::FallbackFailed(format!(
            "Failed to {} {}: {}",
            action,
            self.path.display(),
            err
        ))
    }
}

fn single_line(value: &str) -> String {
    value.replace('\r', "\\r").replace('\n', "\\n")
}

/// Records recovered from a JSON fallback log
#[derive(Debug, Default)]
pub struct FallbackScan {
    pub records: Vec<AuditRecord>,

    /// Lines that could not be decoded (normally only a truncated tail)
    pub skipped: usize,
}

/// Read a JSON-format fallback log back into records.
///
/// Undecodable lines are skipped and counted rather than failing the scan.
pub async fn read_fallback(path: impl AsRef<Path>) -> Result<FallbackScan> {
    let path = path.as_ref();
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FallbackScan::default()),
        Err(e) => return Err(e.into()),
    };

    let mut scan = FallbackScan::default();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditRecord>(line) {
            Ok(record) => scan.records.push(record),
            Err(e) => {
                warn!("Skipping undecodable fallback line {} in {:?}: {}", index + 1, path, e);
                scan.skipped += 1;
            }
        }
    }

    Ok(scan)
}
