// src/utils/config.rs
//! Engine configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! configuration file, then `AUDITLOG__`-prefixed environment variables
//! (`AUDITLOG__AUDIT__BATCH_SIZE=500`).

use crate::audit::fallback::FallbackFormat;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "auditlog.toml";

/// Environment variable overriding the configuration file location
pub const CONFIG_PATH_ENV: &str = "AUDITLOG_CONFIG";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audit: AuditConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Buffering and flush settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Maximum records removed from the buffer per batch
    pub batch_size: usize,

    /// Period between scheduled flushes (milliseconds)
    pub flush_interval_ms: u64,

    /// Safety limit on batches per interval/threshold flush cycle
    pub max_batches_per_flush: usize,

    /// Optional soft cap on buffered records (unbounded when unset)
    pub max_buffered: Option<usize>,

    /// Per-batch store timeout (milliseconds, 0 disables)
    pub persist_timeout_ms: u64,

    /// Fallback log location
    pub fallback_path: PathBuf,

    /// Fallback line encoding
    pub fallback_format: FallbackFormat,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval_ms: 10_000,
            max_batches_per_flush: 1_000,
            max_buffered: None,
            persist_timeout_ms: 30_000,
            fallback_path: PathBuf::from("audit-fallback.log"),
            fallback_format: FallbackFormat::Json,
        }
    }
}

impl AuditConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn persist_timeout(&self) -> Option<Duration> {
        (self.persist_timeout_ms > 0).then(|| Duration::from_millis(self.persist_timeout_ms))
    }

    /// Reject values the flush engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EngineError::InvalidConfig(
                "audit.batch_size must be at least 1".to_string(),
            ));
        }

        if self.flush_interval_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "audit.flush_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.max_batches_per_flush == 0 {
            return Err(EngineError::InvalidConfig(
                "audit.max_batches_per_flush must be at least 1".to_string(),
            ));
        }

        if self.max_buffered == Some(0) {
            return Err(EngineError::InvalidConfig(
                "audit.max_buffered must be at least 1 when set".to_string(),
            ));
        }

        Ok(())
    }
}

/// SQLite store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// How long a writer waits on a locked database (milliseconds)
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("audit.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output (development)
    #[default]
    Text,

    /// Flattened JSON (log aggregators)
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus scrape endpoint; metrics stay in-process when unset
    pub listen_addr: Option<SocketAddr>,
}

impl EngineConfig {
    /// Load configuration from the default file location and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        Self::load_from(path)
    }

    /// Load configuration from `path` (optional) layered under environment overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("AUDITLOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.audit.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.audit.batch_size, 100);
        assert_eq!(config.audit.flush_interval(), Duration::from_secs(10));
        assert_eq!(config.audit.persist_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.audit.fallback_format, FallbackFormat::Json);
        assert!(config.audit.max_buffered.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = EngineConfig::default();
        config.audit.batch_size = 0;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = EngineConfig::default();
        config.audit.flush_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_cap_rejected() {
        let mut config = EngineConfig::default();
        config.audit.max_buffered = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_persist_timeout_disabled() {
        let mut config = EngineConfig::default();
        config.audit.persist_timeout_ms = 0;
        assert!(config.audit.persist_timeout().is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[audit]
batch_size = 25
flush_interval_ms = 500
fallback_format = "text"

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = EngineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.audit.batch_size, 25);
        assert_eq!(config.audit.flush_interval(), Duration::from_millis(500));
        assert_eq!(config.audit.fallback_format, FallbackFormat::Text);
        assert_eq!(config.logging.format, LogFormat::Json);
        // untouched keys keep their defaults
        assert_eq!(config.storage.busy_timeout_ms, 5_000);
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.audit.batch_size, 100);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[audit]\nbatch_size = 0").unwrap();

        let err = EngineConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }
}
