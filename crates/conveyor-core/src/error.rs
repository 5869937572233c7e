//! Unified error types for Conveyor using thiserror.
//!
//! Provides consistent error handling across all components.

use thiserror::Error;

/// The unified error type for Conveyor operations
#[derive(Error, Debug)]
pub enum Error {
    // Broker errors
    #[error("Broker error: {message}")]
    Broker {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Connection pool error: {message}")]
    Pool { message: String },

    // Serialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // Dispatch errors
    #[error("Unknown task: {task}")]
    UnknownTask { task: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    // Generic wrapped error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a broker error
    pub fn broker(message: impl Into<String>) -> Self {
        Error::Broker {
            message: message.into(),
            source: None,
        }
    }

    /// Create a broker error with source
    pub fn broker_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Broker {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection pool error
    pub fn pool(message: impl Into<String>) -> Self {
        Error::Pool {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Error::Serialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create an unknown task error
    pub fn unknown_task(task: impl Into<String>) -> Self {
        Error::UnknownTask { task: task.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Broker { .. } | Error::Pool { .. })
    }
}

/// Result type alias for Conveyor operations
pub type Result<T> = std::result::Result<T, Error>;
