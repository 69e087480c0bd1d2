//! # cistern
//!
//! Synchronous, thread-safe database connection pooling over pluggable
//! drivers.
//!
//! Cistern fronts a non-pooled connection factory with the standard
//! data-source contract: ask for a connection, use it, dispose of the handle.
//! The pool bounds the number of live physical connections, reuses idle
//! ones, reclaims checkouts held past a configurable deadline, and can probe
//! liveness with a ping query before handing a connection out.
//!
//! ## Features
//!
//! - **Bounded pool**: separate caps for active and idle connections
//! - **Overdue reclamation**: leaked checkouts are taken back for waiters
//! - **Liveness probing**: is-closed check plus an optional ping query
//! - **Reconfiguration draining**: identity-affecting settings changes close
//!   every pooled connection so stale sessions never leak across configs
//! - **Statistics**: monotonic counters for requests, waits, bad connections
//!   and overdue claims
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cistern::prelude::*;
//! use std::sync::Arc;
//!
//! let driver: Arc<dyn Driver> = Arc::new(MyDriver);
//! let unpooled = UnpooledDataSource::new(driver, "postgres://localhost/app");
//! let pool = PooledDataSource::with_config(
//!     unpooled,
//!     PoolConfig::default()
//!         .with_max_active_connections(20)
//!         .with_ping_enabled(true)
//!         .with_ping_query("SELECT 1"),
//! );
//!
//! let mut conn = pool.get_connection()?;
//! let rows = conn.query("SELECT id FROM users")?;
//! conn.close()?; // or just drop it; the connection returns to the pool
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod pool;
pub mod types;
pub mod unpooled;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value model
    pub use crate::types::{Row, Value};

    // Connection traits and config
    pub use crate::connection::{Connection, ConnectionConfig, Driver, IsolationLevel};

    // Data sources
    pub use crate::pool::{
        PoolConfig, PoolStats, PooledConnection, PooledDataSource, SharedConnection,
    };
    pub use crate::unpooled::UnpooledDataSource;
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use pool::{PooledConnection, PooledDataSource};

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _value = Value::Int(42);
        let _config = ConnectionConfig::new("postgres://localhost/test");
        let _pool_config = PoolConfig::default();
        let _stats = PoolStats::default();
    }

    #[test]
    fn test_error_types() {
        let err = Error::connection("test error");
        assert!(err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Connection);
    }
}
