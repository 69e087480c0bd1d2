//! Mock implementations for testing
//!
//! `MockDriver` mints `MockConnection`s and journals every lifecycle event
//! (opens, closes, rollbacks, applied session settings) so tests can assert
//! exact open/close accounting. Failure modes are toggled at runtime and
//! take effect on live connections, which lets tests model connections that
//! go bad while sitting in the pool.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use cistern::prelude::*;

/// Journal of everything that happened across a driver's connections
#[derive(Debug, Default)]
pub struct MockJournal {
    opened: AtomicU64,
    closed: AtomicU64,
    double_closes: AtomicU64,
    rollbacks: AtomicU64,
    commits: AtomicU64,
    executed: Mutex<Vec<String>>,
    settings: Mutex<Vec<String>>,
    connects: Mutex<Vec<(String, Option<String>)>>,
}

impl MockJournal {
    /// Physical connections opened so far
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    /// Physical connections closed so far
    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close calls that hit an already-closed connection
    pub fn double_closes(&self) -> u64 {
        self.double_closes.load(Ordering::SeqCst)
    }

    /// Rollbacks performed across all connections
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Commits performed across all connections
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed
    pub fn open_connections(&self) -> u64 {
        self.opened() - self.closed()
    }

    /// Every statement executed, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    /// Every session setting applied, in order
    pub fn settings(&self) -> Vec<String> {
        self.settings.lock().clone()
    }

    /// (url, username) pairs for every connect call, in order
    pub fn connects(&self) -> Vec<(String, Option<String>)> {
        self.connects.lock().clone()
    }

    fn record_statement(&self, sql: &str) {
        self.executed.lock().push(sql.to_string());
    }

    fn record_setting(&self, setting: String) {
        self.settings.lock().push(setting);
    }
}

/// Runtime-togglable failure modes, shared with live connections
#[derive(Debug, Default)]
struct MockBehavior {
    fail_query: AtomicBool,
    fail_rollback: AtomicBool,
}

/// A driver that mints journaled in-memory connections
#[derive(Debug, Default)]
pub struct MockDriver {
    journal: Arc<MockJournal>,
    behavior: Arc<MockBehavior>,
    fail_connect: AtomicBool,
    born_closed: AtomicBool,
    next_id: AtomicU64,
}

impl MockDriver {
    /// Create a driver with a fresh journal
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The journal shared by all connections this driver has minted
    pub fn journal(&self) -> Arc<MockJournal> {
        Arc::clone(&self.journal)
    }

    /// Make every subsequent connect call fail
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent connection report itself closed from birth
    pub fn set_born_closed(&self, born_closed: bool) {
        self.born_closed.store(born_closed, Ordering::SeqCst);
    }

    /// Make every query fail, including on connections already minted
    pub fn set_fail_query(&self, fail: bool) {
        self.behavior.fail_query.store(fail, Ordering::SeqCst);
    }

    /// Make every rollback fail, including on connections already minted
    pub fn set_fail_rollback(&self, fail: bool) {
        self.behavior.fail_rollback.store(fail, Ordering::SeqCst);
    }
}

impl Driver for MockDriver {
    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with("mock://")
    }

    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::connection("mock driver refused to connect"));
        }
        self.journal
            .connects
            .lock()
            .push((config.url.clone(), config.username.clone()));
        self.journal.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            closed: self.born_closed.load(Ordering::SeqCst),
            auto_commit: true,
            journal: Arc::clone(&self.journal),
            behavior: Arc::clone(&self.behavior),
        }))
    }
}

/// An in-memory connection that journals its lifecycle
pub struct MockConnection {
    id: u64,
    closed: bool,
    auto_commit: bool,
    journal: Arc<MockJournal>,
    behavior: Arc<MockBehavior>,
}

impl Connection for MockConnection {
    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        if self.closed {
            return Err(Error::connection("connection is closed"));
        }
        if self.behavior.fail_query.load(Ordering::SeqCst) {
            return Err(Error::query_with_sql("mock query failure", sql));
        }
        self.journal.record_statement(sql);
        Ok(vec![Row::new(vec![Value::Int(1)])])
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        if self.closed {
            return Err(Error::connection("connection is closed"));
        }
        if self.behavior.fail_query.load(Ordering::SeqCst) {
            return Err(Error::query_with_sql("mock execute failure", sql));
        }
        self.journal.record_statement(sql);
        Ok(1)
    }

    fn commit(&mut self) -> Result<()> {
        self.journal.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.behavior.fail_rollback.load(Ordering::SeqCst) {
            return Err(Error::transaction("mock rollback failure"));
        }
        self.journal.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn auto_commit(&self) -> Result<bool> {
        Ok(self.auto_commit)
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
        self.auto_commit = auto_commit;
        self.journal
            .record_setting(format!("conn {} auto_commit={}", self.id, auto_commit));
        Ok(())
    }

    fn set_transaction_isolation(&mut self, level: IsolationLevel) -> Result<()> {
        self.journal
            .record_setting(format!("conn {} isolation={}", self.id, level));
        Ok(())
    }

    fn set_network_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.journal
            .record_setting(format!("conn {} network_timeout={:?}", self.id, timeout));
        Ok(())
    }

    fn is_closed(&self) -> Result<bool> {
        Ok(self.closed)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            self.journal.double_closes.fetch_add(1, Ordering::SeqCst);
        } else {
            self.closed = true;
            self.journal.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
