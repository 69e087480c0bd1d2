//! Error types for cistern
//!
//! Provides granular error classification for proper retry handling:
//! - Retriable errors (connection failures, pool exhaustion)
//! - Non-retriable errors (invalid handles, configuration mistakes)

use std::fmt;
use thiserror::Error;

/// Result type for cistern operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (retriable)
    Connection,
    /// Query execution errors
    Query,
    /// Transaction errors
    Transaction,
    /// Configuration error
    Configuration,
    /// Pool could not produce a connection (retriable with backoff)
    Pool,
    /// Use of a handle after it was invalidated (not retriable)
    InvalidHandle,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Pool)
    }
}

/// Main error type for cistern
#[derive(Error, Debug)]
pub enum Error {
    /// Opening or talking to a physical connection failed
    #[error("connection error: {message}")]
    Connection {
        /// Human-readable description
        message: String,
        /// Underlying driver error, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        /// Human-readable description
        message: String,
        /// The statement that failed, if known
        sql: Option<String>,
        /// Underlying driver error, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Commit or rollback failed
    #[error("transaction error: {message}")]
    Transaction {
        /// Human-readable description
        message: String,
        /// Underlying driver error, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration {
        /// Human-readable description
        message: String,
    },

    /// The pool failed to produce any connection at all
    #[error("pool exhausted: {message}")]
    PoolExhausted {
        /// Human-readable description
        message: String,
    },

    /// The pool gave up after too many bad connections in a single acquire
    #[error("no good connection available: {message}")]
    NoGoodConnection {
        /// Human-readable description
        message: String,
        /// The last driver error observed, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A pooled handle was used after the pool invalidated it
    #[error("error accessing pooled connection: connection is invalid")]
    ConnectionInvalid,
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::PoolExhausted { .. } | Self::NoGoodConnection { .. } => ErrorCategory::Pool,
            Self::ConnectionInvalid => ErrorCategory::InvalidHandle,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with the offending SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a pool-exhausted error
    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::PoolExhausted {
            message: message.into(),
        }
    }

    /// Create a no-good-connection error
    pub fn no_good_connection(message: impl Into<String>) -> Self {
        Self::NoGoodConnection {
            message: message.into(),
            source: None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Transaction => write!(f, "transaction"),
            Self::Configuration => write!(f, "configuration"),
            Self::Pool => write!(f, "pool"),
            Self::InvalidHandle => write!(f, "invalid_handle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retriable() {
        assert!(ErrorCategory::Connection.is_retriable());
        assert!(ErrorCategory::Pool.is_retriable());

        assert!(!ErrorCategory::Query.is_retriable());
        assert!(!ErrorCategory::Configuration.is_retriable());
        assert!(!ErrorCategory::InvalidHandle.is_retriable());
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(Error::connection("refused").is_retriable());
        assert!(Error::no_good_connection("gave up").is_retriable());

        assert!(!Error::ConnectionInvalid.is_retriable());
        assert!(!Error::config("bad url").is_retriable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::connection("connection refused");
        assert!(err.to_string().contains("connection refused"));

        let err = Error::query_with_sql("syntax error", "SELEC 1");
        assert!(err.to_string().contains("syntax error"));
    }
}
