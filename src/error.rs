//! Unified error handling for the recrawl crate
//!
//! Every fallible operation in the library returns [`Result<T>`]. Errors are
//! classified by [`ErrorCategory`] so callers can decide between retrying,
//! skipping an entry, or giving up.
//!
//! # Usage
//!
//! ```rust,ignore
//! use recrawl::error::{Error, ErrorCategory, RecrawlErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::debug!(error = %err, "Retrying");
//!     } else {
//!         tracing::error!(error = %err, category = ?err.category(), "Fatal error");
//!     }
//! }
//! ```

use thiserror::Error;

/// Common trait for recrawl error types
pub trait RecrawlErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Store or database unreachable, connection reset, pool exhausted
    Transient,
    /// An item could not be encoded for the durable queue
    Serialization,
    /// Local queue depth exceeded its threshold
    Overflow,
    /// A required key or index does not exist
    NotFound,
    /// A stored cache blob failed to decompress or decode
    Corruption,
    /// Invalid configuration or caller arguments
    Config,
}

impl ErrorCategory {
    /// Short lowercase label, used as a metrics and log field
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Serialization => "serialization",
            Self::Overflow => "overflow",
            Self::NotFound => "not_found",
            Self::Corruption => "corruption",
            Self::Config => "config",
        }
    }
}

/// Unified error type for the recrawl crate
#[derive(Error, Debug)]
pub enum Error {
    /// Redis command errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis connection pool errors
    #[error("Redis pool error: {0}")]
    RedisPool(#[from] deadpool_redis::PoolError),

    /// PostgreSQL errors
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// PostgreSQL connection pool errors
    #[error("PostgreSQL pool error: {0}")]
    PostgresPool(#[from] deadpool_postgres::PoolError),

    /// A backend is unreachable for a reason not covered by a driver error
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// An item could not be serialized for the given key
    #[error("Failed to serialize item for '{key}': {reason}")]
    Serialization { key: String, reason: String },

    /// Local queue overflowed; drained items were pushed back to the durable queue
    #[error(
        "Local queue overflow on '{key}': depth {depth} exceeded {threshold}, \
         requeued {requeued} item(s), lost {lost}"
    )]
    Overflow {
        key: String,
        depth: usize,
        threshold: usize,
        requeued: usize,
        lost: usize,
    },

    /// A required key or index does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A cache blob could not be decompressed or decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid caller argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

impl RecrawlErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            // A reply of the wrong shape means the key holds foreign data
            Self::Redis(e) if e.kind() == redis::ErrorKind::TypeError => ErrorCategory::Corruption,
            Self::Redis(_) => ErrorCategory::Transient,
            Self::RedisPool(_) | Self::Postgres(_) | Self::PostgresPool(_) | Self::Unavailable(_) => {
                ErrorCategory::Transient
            }
            Self::Serialization { .. } => ErrorCategory::Serialization,
            Self::Overflow { .. } => ErrorCategory::Overflow,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Decode(_) => ErrorCategory::Corruption,
            Self::InvalidArgument(_) | Self::Config(_) => ErrorCategory::Config,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a serialization error for `key`
    pub fn serialization(key: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::Serialization {
            key: key.into(),
            reason: source.to_string(),
        }
    }
}

impl From<deadpool_redis::CreatePoolError> for Error {
    fn from(err: deadpool_redis::CreatePoolError) -> Self {
        Self::Config(format!("Failed to create Redis pool: {err}"))
    }
}

impl From<deadpool_postgres::CreatePoolError> for Error {
    fn from(err: deadpool_postgres::CreatePoolError) -> Self {
        Self::Config(format!("Failed to create PostgreSQL pool: {err}"))
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let err = Error::serialization("rspider:items", "key must be a string");
        assert_eq!(err.category(), ErrorCategory::Serialization);

        let err = Error::decode("unknown version byte 0x07");
        assert_eq!(err.category(), ErrorCategory::Corruption);

        let err = Error::NotFound("sitemap-news".to_string());
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::Unavailable("connection refused".to_string()).is_recoverable());
        assert!(!Error::decode("truncated").is_recoverable());

        let overflow = Error::Overflow {
            key: "rspider:items".to_string(),
            depth: 2001,
            threshold: 2000,
            requeued: 2001,
            lost: 0,
        };
        assert!(!overflow.is_recoverable());
        assert_eq!(overflow.category(), ErrorCategory::Overflow);
    }

    #[test]
    fn test_redis_io_error_is_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: Error = redis::RedisError::from(io).into();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_overflow_message_names_key() {
        let err = Error::Overflow {
            key: "rspider:items".to_string(),
            depth: 7,
            threshold: 5,
            requeued: 7,
            lost: 0,
        };
        let msg = err.to_string();
        assert!(msg.contains("rspider:items"));
        assert!(msg.contains("requeued 7"));
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("workers must be greater than 0");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
    }
}
