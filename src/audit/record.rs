// src/audit/record.rs
//! Audit record model
//!
//! A record is opened with [`AuditRecord::begin`] when a request arrives and
//! closed exactly once with [`PendingRecord::finish`] (or
//! [`PendingRecord::fail`]) after the downstream work completes. Only closed
//! records can be submitted, and a closed record has no setters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::{Duration, Instant};

/// Actor recorded when the producer could not identify the caller
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// Status recorded when the downstream operation failed without a response
pub const FAILURE_STATUS: u16 = 500;

/// One audited request, immutable once completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the request was received (UTC)
    timestamp: DateTime<Utc>,

    /// Caller identity
    #[serde(default = "anonymous")]
    actor: String,

    /// Remote address of the caller
    #[serde(default)]
    origin: Option<String>,

    /// Request method
    method: String,

    /// Request path
    path: String,

    /// Request body, absent when empty
    #[serde(default, deserialize_with = "empty_as_none")]
    payload: Option<String>,

    /// Response status
    status: u16,

    /// Time spent in the downstream operation (milliseconds)
    duration_ms: u64,
}

fn anonymous() -> String {
    ANONYMOUS_ACTOR.to_string()
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

impl AuditRecord {
    /// Open a record for a request that has just arrived
    pub fn begin(method: impl Into<String>, path: impl Into<String>) -> PendingRecord {
        PendingRecord {
            timestamp: Utc::now(),
            started: Instant::now(),
            actor: None,
            origin: None,
            method: method.into(),
            path: path.into(),
            payload: None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn is_anonymous(&self) -> bool {
        self.actor == ANONYMOUS_ACTOR
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

/// A record whose outcome is not known yet
#[derive(Debug, Clone)]
pub struct PendingRecord {
    timestamp: DateTime<Utc>,
    started: Instant,
    actor: Option<String>,
    origin: Option<String>,
    method: String,
    path: String,
    payload: Option<String>,
}

impl PendingRecord {
    /// Override the receive time (defaults to the moment `begin` was called)
    pub fn received_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the caller identity; blank identities stay anonymous
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        let actor = actor.into();
        self.actor = (!actor.trim().is_empty()).then_some(actor);
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Attach the request body; an empty body is recorded as absent
    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        self.payload = (!payload.is_empty()).then_some(payload);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Close the record with the downstream status, measuring elapsed time
    pub fn finish(self, status: u16) -> AuditRecord {
        let elapsed = self.started.elapsed();
        self.finish_with_duration(status, elapsed)
    }

    /// Close the record for a downstream operation that failed
    pub fn fail(self) -> AuditRecord {
        self.finish(FAILURE_STATUS)
    }

    /// Close the record with a duration measured by the caller
    pub fn finish_with_duration(self, status: u16, duration: Duration) -> AuditRecord {
        AuditRecord {
            timestamp: self.timestamp,
            actor: self.actor.unwrap_or_else(anonymous),
            origin: self.origin,
            method: self.method,
            path: self.path,
            payload: self.payload,
            status,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
