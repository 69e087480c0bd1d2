//! Test helpers

use std::sync::Arc;

use cistern::prelude::*;

use crate::mocks::{MockDriver, MockJournal};

/// Install a test-friendly tracing subscriber. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Default mock connection configuration used across the tests
pub fn mock_connection_config() -> ConnectionConfig {
    ConnectionConfig::new("mock://primary/db")
        .with_username("app")
        .with_password("secret")
}

/// A pooled data source over a fresh mock driver
pub fn pooled(config: PoolConfig) -> (PooledDataSource, Arc<MockDriver>, Arc<MockJournal>) {
    pooled_with_connection_config(config, mock_connection_config())
}

/// A pooled data source over a fresh mock driver with an explicit
/// connection configuration
pub fn pooled_with_connection_config(
    config: PoolConfig,
    connection_config: ConnectionConfig,
) -> (PooledDataSource, Arc<MockDriver>, Arc<MockJournal>) {
    let driver = MockDriver::new();
    let journal = driver.journal();
    let unpooled =
        UnpooledDataSource::with_config(Arc::clone(&driver) as Arc<dyn Driver>, connection_config);
    let pool = PooledDataSource::with_config(unpooled, config);
    (pool, driver, journal)
}
