//! Error handling for preference learning
//!
//! Structured error types shared by the selector, dataset, trainer and
//! checkpoint code. Invalid input and numeric failures propagate to the
//! caller; sink failures are reported through `Sink` and swallowed by the
//! trainer.

use thiserror::Error;

/// Main error type for the preference learning loop
#[derive(Error, Debug)]
pub enum PrefError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Cannot select queries from an empty pool")]
    EmptyQueryPool,

    #[error("Numeric error: {message}")]
    Numeric { message: String },

    #[error("Tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("I/O operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Metrics sink error: {message}")]
    Sink { message: String },

    #[error("Mutex lock failed: {resource}")]
    MutexPoisoned { resource: String },
}

/// Type alias for Result with PrefError
pub type PrefResult<T> = Result<T, PrefError>;

impl PrefError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a numeric error
    pub fn numeric(message: impl Into<String>) -> Self {
        Self::Numeric {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Create a metrics sink error
    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink {
            message: message.into(),
        }
    }
}

/// Helper trait for safe mutex operations
///
/// Returns a `PrefError` on poison instead of panicking.
pub trait SafeLock<T: ?Sized> {
    fn safe_lock(&self) -> PrefResult<std::sync::MutexGuard<'_, T>>;
}

impl<T: ?Sized> SafeLock<T> for std::sync::Mutex<T> {
    fn safe_lock(&self) -> PrefResult<std::sync::MutexGuard<'_, T>> {
        self.lock().map_err(|_| PrefError::MutexPoisoned {
            resource: "generic_mutex".to_string(),
        })
    }
}

/// Convert from serde_json errors
impl From<serde_json::Error> for PrefError {
    fn from(err: serde_json::Error) -> Self {
        PrefError::serialization("json_operation", err)
    }
}

/// Convert from std::io errors
impl From<std::io::Error> for PrefError {
    fn from(err: std::io::Error) -> Self {
        PrefError::io("io_operation", err)
    }
}

/// Convert from figment errors
impl From<figment::Error> for PrefError {
    fn from(err: figment::Error) -> Self {
        PrefError::config(err.to_string())
    }
}
