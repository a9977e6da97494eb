// src/utils/errors.rs
//! Engine error types

use std::any::Any;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the audit engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration values rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration sources could not be loaded or deserialized
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The durable store rejected or could not accept a batch
    #[error("storage failed: {0}")]
    StorageFailed(String),

    /// The durable store did not answer within the persist timeout
    #[error("persist timed out after {0:?}")]
    PersistTimeout(Duration),

    /// The fallback log could not be written
    #[error("fallback write failed: {0}")]
    FallbackFailed(String),

    /// The buffer reached its configured capacity
    #[error("audit buffer full ({0} records)")]
    BufferFull(usize),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tracing or metrics setup failed
    #[error("observability setup failed: {0}")]
    Observability(String),

    /// A background task panicked or was cancelled
    #[error("background task failed: {0}")]
    TaskFailed(String),

    /// Lifecycle call made in the wrong state (e.g. starting twice)
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
}

impl EngineError {
    /// Whether this error came from the durable store path
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            EngineError::StorageFailed(_) | EngineError::PersistTimeout(_)
        )
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_failure_classification() {
        assert!(EngineError::StorageFailed("down".into()).is_store_failure());
        assert!(EngineError::PersistTimeout(Duration::from_secs(1)).is_store_failure());
        assert!(!EngineError::FallbackFailed("disk full".into()).is_store_failure());
        assert!(!EngineError::BufferFull(10).is_store_failure());
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "code 7");
    }

    #[test]
    fn test_display() {
        let err = EngineError::BufferFull(42);
        assert_eq!(err.to_string(), "audit buffer full (42 records)");
    }
}
