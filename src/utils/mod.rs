// src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use self::config::{EngineConfig, LogFormat};
pub use self::errors::{EngineError, Result};
