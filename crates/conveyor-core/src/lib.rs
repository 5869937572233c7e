//! # Conveyor Core
//!
//! Shared types for the Conveyor task queue: the unified error type,
//! configuration structures, and logging setup used across the workspace.

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{AppConfig, BrokerConfig, LogFormat, LoggingConfig, WorkerConfig};
pub use error::{Error, Result};

/// The current version of Conveyor
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
