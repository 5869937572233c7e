//! Configuration system for Conveyor using config-rs.
//!
//! Supports TOML file and environment variable configuration layered over
//! built-in defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Broker configuration
    pub broker: BrokerConfig,
    /// Worker configuration
    pub worker: WorkerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            worker: WorkerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional TOML file, and
    /// `CONVEYOR__`-prefixed environment variables (later sources win).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&AppConfig::default())
            .map_err(|e| Error::configuration(format!("invalid defaults: {}", e)))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }

        builder
            .add_source(config::Environment::with_prefix("CONVEYOR").separator("__"))
            .build()
            .map_err(|e| Error::configuration(format!("failed to load configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| Error::configuration(format!("invalid configuration: {}", e)))
    }
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Store URL
    pub url: String,
    /// Key namespace prefixed to every collection name (None = bare names)
    pub namespace: Option<String>,
    /// Maximum connection pool size
    pub pool_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            namespace: Some("conveyor".to_string()),
            pool_size: 8,
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Identity used in heartbeats; should be unique within the fleet
    pub name: String,
    /// Upper bound on deliveries buffered locally (>= 1)
    pub prefetch: usize,
    /// Milliseconds between successive heartbeats
    pub heartbeat_interval_ms: u64,
    /// Milliseconds between successive scheduler polls
    pub schedule_poll_interval_ms: u64,
    /// Milliseconds between successive reaper ticks
    pub reaper_interval_ms: u64,
    /// Reservations older than this many milliseconds are recovered
    pub visibility_timeout_ms: u64,
    /// Upper bound in milliseconds on a single blocking reserve
    pub reserve_timeout_ms: u64,
    /// Sleep duration when the prefetch buffer is empty (milliseconds)
    pub sleep_on_empty_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: format!("worker-{}", std::process::id()),
            prefetch: 1,
            heartbeat_interval_ms: 5_000,
            schedule_poll_interval_ms: 1_000,
            reaper_interval_ms: 10_000,
            visibility_timeout_ms: 30_000,
            reserve_timeout_ms: 5_000,
            sleep_on_empty_ms: 100,
        }
    }
}

impl WorkerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn schedule_poll_interval(&self) -> Duration {
        Duration::from_millis(self.schedule_poll_interval_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn reserve_timeout(&self) -> Duration {
        Duration::from_millis(self.reserve_timeout_ms)
    }

    pub fn sleep_on_empty(&self) -> Duration {
        Duration::from_millis(self.sleep_on_empty_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}
