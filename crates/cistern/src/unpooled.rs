//! Non-pooled data source
//!
//! Opens a fresh physical connection for every request by delegating to a
//! [`Driver`], then applies the configured session defaults. The pooled data
//! source builds on top of this; it can also be used standalone where
//! pooling is not wanted.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::connection::{Connection, ConnectionConfig, Driver, IsolationLevel};
use crate::error::{Error, Result};

/// A data source that opens a fresh physical connection per request.
pub struct UnpooledDataSource {
    driver: RwLock<Arc<dyn Driver>>,
    config: RwLock<ConnectionConfig>,
}

impl UnpooledDataSource {
    /// Create a data source for the given driver and URL, using default
    /// session settings.
    pub fn new(driver: Arc<dyn Driver>, url: impl Into<String>) -> Self {
        Self::with_config(driver, ConnectionConfig::new(url))
    }

    /// Create a data source from a full connection configuration.
    pub fn with_config(driver: Arc<dyn Driver>, config: ConnectionConfig) -> Self {
        Self {
            driver: RwLock::new(driver),
            config: RwLock::new(config),
        }
    }

    /// Open a connection with the configured credentials.
    pub fn get_connection(&self) -> Result<Box<dyn Connection>> {
        let config = self.config.read().clone();
        self.open(config)
    }

    /// Open a connection with credentials overriding the configured ones.
    pub fn get_connection_as(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Box<dyn Connection>> {
        let mut config = self.config.read().clone();
        if let Some(username) = username {
            config.username = Some(username.to_string());
        }
        if let Some(password) = password {
            config.password = Some(password.to_string());
        }
        self.open(config)
    }

    fn open(&self, config: ConnectionConfig) -> Result<Box<dyn Connection>> {
        let driver = Arc::clone(&self.driver.read());
        if !driver.accepts_url(&config.url) {
            return Err(Error::config(format!(
                "driver does not accept url '{}'",
                config.url
            )));
        }
        let mut conn = driver.connect(&config)?;
        Self::initialize(conn.as_mut(), &config)?;
        Ok(conn)
    }

    /// Apply the configured session defaults to a fresh connection.
    fn initialize(conn: &mut dyn Connection, config: &ConnectionConfig) -> Result<()> {
        if let Some(timeout) = config.network_timeout {
            conn.set_network_timeout(timeout)?;
        }
        if conn.auto_commit()? != config.auto_commit {
            conn.set_auto_commit(config.auto_commit)?;
        }
        if let Some(level) = config.default_isolation {
            conn.set_transaction_isolation(level)?;
        }
        Ok(())
    }

    /// Replace the driver.
    pub fn set_driver(&self, driver: Arc<dyn Driver>) {
        *self.driver.write() = driver;
    }

    /// The configured URL.
    pub fn url(&self) -> String {
        self.config.read().url.clone()
    }

    /// Set the URL.
    pub fn set_url(&self, url: impl Into<String>) {
        self.config.write().url = url.into();
    }

    /// The configured username.
    pub fn username(&self) -> Option<String> {
        self.config.read().username.clone()
    }

    /// Set the username.
    pub fn set_username(&self, username: impl Into<String>) {
        self.config.write().username = Some(username.into());
    }

    /// The configured password.
    pub fn password(&self) -> Option<String> {
        self.config.read().password.clone()
    }

    /// Set the password.
    pub fn set_password(&self, password: impl Into<String>) {
        self.config.write().password = Some(password.into());
    }

    /// The auto-commit default applied to fresh connections.
    pub fn auto_commit(&self) -> bool {
        self.config.read().auto_commit
    }

    /// Set the auto-commit default.
    pub fn set_auto_commit(&self, auto_commit: bool) {
        self.config.write().auto_commit = auto_commit;
    }

    /// The isolation level applied to fresh connections, if any.
    pub fn default_isolation(&self) -> Option<IsolationLevel> {
        self.config.read().default_isolation
    }

    /// Set the default isolation level.
    pub fn set_default_isolation(&self, level: Option<IsolationLevel>) {
        self.config.write().default_isolation = level;
    }

    /// The network timeout applied to fresh connections, if any.
    pub fn network_timeout(&self) -> Option<Duration> {
        self.config.read().network_timeout
    }

    /// Set the default network timeout.
    pub fn set_network_timeout(&self, timeout: Option<Duration>) {
        self.config.write().network_timeout = timeout;
    }

    /// Set a driver property.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.config.write().properties.insert(key.into(), value.into());
    }

    /// Replace all driver properties.
    pub fn set_properties(
        &self,
        properties: std::collections::HashMap<String, String>,
    ) {
        self.config.write().properties = properties;
    }

    /// Snapshot of the current connection configuration.
    pub fn config(&self) -> ConnectionConfig {
        self.config.read().clone()
    }
}

impl std::fmt::Debug for UnpooledDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnpooledDataSource")
            .field("config", &*self.config.read())
            .finish_non_exhaustive()
    }
}
