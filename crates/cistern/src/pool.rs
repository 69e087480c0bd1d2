//! Pooled data source
//!
//! A synchronous, thread-safe connection pool layered over
//! [`UnpooledDataSource`]. Bounds the number of live physical connections,
//! reuses idle ones, reclaims checkouts that have been held past a deadline,
//! and optionally probes liveness with a ping query before handing a
//! connection out.
//!
//! All pool mutation is serialized behind a single mutex guarding the pool
//! state; waiters block on one condition variable with a bounded
//! wait slice and re-evaluate, so a missed notification costs at most one
//! slice. Note that connection creation and the liveness probe also run
//! under that mutex, so a slow network round-trip stalls other pool
//! operations for its duration. This mirrors the classic synchronous pool
//! design and is a known limitation, not an invariant.
//!
//! # Example
//!
//! ```rust,ignore
//! use cistern::prelude::*;
//!
//! let unpooled = UnpooledDataSource::new(driver, "postgres://localhost/app");
//! let pool = PooledDataSource::with_config(
//!     unpooled,
//!     PoolConfig::default().with_max_active_connections(20),
//! );
//!
//! let mut conn = pool.get_connection()?;
//! conn.execute("DELETE FROM sessions WHERE expired")?;
//! conn.close()?; // or just drop it; the connection returns to the pool
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::connection::{Connection, IsolationLevel};
use crate::error::{Error, Result};
use crate::types::Row;
use crate::unpooled::UnpooledDataSource;

/// Shared handle to one physical connection.
///
/// The pool re-wraps physical connections as they move between callers and
/// the idle list; the `Arc` lets a retired handle keep pointing at the same
/// session without being able to use it (its validity flag is cleared).
pub type SharedConnection = Arc<Mutex<Box<dyn Connection>>>;

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on simultaneously checked-out connections
    pub max_active_connections: usize,
    /// Upper bound on idle connections retained; excess returns are closed
    pub max_idle_connections: usize,
    /// A checkout held longer than this may be reclaimed for a waiter
    pub max_checkout_time: Duration,
    /// Single wait slice; a timed-out waiter re-examines pool state
    pub time_to_wait: Duration,
    /// Extra bad-connection retries tolerated within one acquire, on top of
    /// `max_idle_connections`
    pub bad_connection_tolerance: usize,
    /// Probe SQL sent to the database when pinging is enabled
    pub ping_query: String,
    /// Whether to probe liveness beyond an is-closed check
    pub ping_enabled: bool,
    /// Probe only connections idle longer than this; `Some(Duration::ZERO)`
    /// probes every time, `None` disables the probe query entirely
    pub ping_connections_not_used_for: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active_connections: 10,
            max_idle_connections: 5,
            max_checkout_time: Duration::from_secs(20),
            time_to_wait: Duration::from_secs(20),
            bad_connection_tolerance: 3,
            ping_query: "NO PING QUERY SET".to_string(),
            ping_enabled: false,
            ping_connections_not_used_for: Some(Duration::ZERO),
        }
    }
}

impl PoolConfig {
    /// Set the maximum number of active connections
    pub fn with_max_active_connections(mut self, n: usize) -> Self {
        self.max_active_connections = n;
        self
    }

    /// Set the maximum number of idle connections
    pub fn with_max_idle_connections(mut self, n: usize) -> Self {
        self.max_idle_connections = n;
        self
    }

    /// Set the checkout time after which a connection may be reclaimed
    pub fn with_max_checkout_time(mut self, d: Duration) -> Self {
        self.max_checkout_time = d;
        self
    }

    /// Set the wait slice for saturated-pool waiters
    pub fn with_time_to_wait(mut self, d: Duration) -> Self {
        self.time_to_wait = d;
        self
    }

    /// Set the bad-connection tolerance
    pub fn with_bad_connection_tolerance(mut self, n: usize) -> Self {
        self.bad_connection_tolerance = n;
        self
    }

    /// Set the ping query
    pub fn with_ping_query(mut self, sql: impl Into<String>) -> Self {
        self.ping_query = sql.into();
        self
    }

    /// Enable or disable the ping query
    pub fn with_ping_enabled(mut self, enabled: bool) -> Self {
        self.ping_enabled = enabled;
        self
    }

    /// Set the idle threshold above which connections are probed
    pub fn with_ping_connections_not_used_for(mut self, threshold: Option<Duration>) -> Self {
        self.ping_connections_not_used_for = threshold;
        self
    }
}

/// A point-in-time snapshot of pool statistics.
///
/// All counters are monotonic for the lifetime of the pool; the idle and
/// active sizes reflect the instant the snapshot was taken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Successful acquires since pool creation
    pub request_count: u64,
    /// Total time spent inside successful acquires
    pub accumulated_request_time: Duration,
    /// Total checkout time across returned and reclaimed connections
    pub accumulated_checkout_time: Duration,
    /// Overdue checkouts reclaimed for waiters
    pub claimed_overdue_connection_count: u64,
    /// Total checkout time of reclaimed checkouts
    pub accumulated_checkout_time_of_overdue_connections: Duration,
    /// Acquires that had to wait at least once
    pub had_to_wait_count: u64,
    /// Total time acquires spent blocked on the pool
    pub accumulated_wait_time: Duration,
    /// Connections found unusable (failed probe, invalid return, failed open)
    pub bad_connection_count: u64,
    /// Idle connections at snapshot time
    pub idle_connections: usize,
    /// Checked-out connections at snapshot time
    pub active_connections: usize,
}

impl PoolStats {
    /// Average time spent inside successful acquires
    pub fn average_request_time(&self) -> Duration {
        Self::avg(self.accumulated_request_time, self.request_count)
    }

    /// Average time waiters spent blocked
    pub fn average_wait_time(&self) -> Duration {
        Self::avg(self.accumulated_wait_time, self.had_to_wait_count)
    }

    /// Average checkout duration
    pub fn average_checkout_time(&self) -> Duration {
        Self::avg(self.accumulated_checkout_time, self.request_count)
    }

    /// Average checkout duration of reclaimed connections
    pub fn average_overdue_checkout_time(&self) -> Duration {
        Self::avg(
            self.accumulated_checkout_time_of_overdue_connections,
            self.claimed_overdue_connection_count,
        )
    }

    fn avg(total: Duration, count: u64) -> Duration {
        if count == 0 {
            Duration::ZERO
        } else {
            total / u32::try_from(count).unwrap_or(u32::MAX)
        }
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "requests: {}", self.request_count)?;
        writeln!(f, "average request time: {:?}", self.average_request_time())?;
        writeln!(f, "average checkout time: {:?}", self.average_checkout_time())?;
        writeln!(f, "had to wait: {}", self.had_to_wait_count)?;
        writeln!(f, "average wait time: {:?}", self.average_wait_time())?;
        writeln!(f, "bad connections: {}", self.bad_connection_count)?;
        writeln!(
            f,
            "claimed overdue: {}",
            self.claimed_overdue_connection_count
        )?;
        writeln!(
            f,
            "average overdue checkout time: {:?}",
            self.average_overdue_checkout_time()
        )?;
        write!(
            f,
            "idle: {}, active: {}",
            self.idle_connections, self.active_connections
        )
    }
}

/// Internal wrapper tying one physical connection to its pool lifecycle.
///
/// Clones share the physical connection and the validity flag; the flag is
/// one-way (true to false). A re-wrap mints a fresh flag around the same
/// physical connection, which is how a release or an overdue reclaim cuts
/// off the previous holder.
#[derive(Clone)]
struct PoolEntry {
    real: SharedConnection,
    id: u64,
    valid: Arc<AtomicBool>,
    type_code: u64,
    created_at: Instant,
    last_used_at: Instant,
    checkout_at: Instant,
}

impl PoolEntry {
    fn new(real: Box<dyn Connection>, id: u64, type_code: u64) -> Self {
        let now = Instant::now();
        Self {
            real: Arc::new(Mutex::new(real)),
            id,
            valid: Arc::new(AtomicBool::new(true)),
            type_code,
            created_at: now,
            last_used_at: now,
            checkout_at: now,
        }
    }

    /// New wrapper around the same physical connection, preserving creation
    /// and last-use times. The old wrapper keeps its own flag and must be
    /// invalidated by the caller.
    fn rewrap(&self) -> Self {
        Self {
            real: Arc::clone(&self.real),
            id: self.id,
            valid: Arc::new(AtomicBool::new(true)),
            type_code: self.type_code,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            checkout_at: self.checkout_at,
        }
    }

    fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    fn is_valid_flag(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Wrapper identity: two entries are the same wrapper only if they share
    /// a validity flag. Entries around the same physical connection but from
    /// different wrap generations are distinct.
    fn same_wrapper(&self, other: &PoolEntry) -> bool {
        Arc::ptr_eq(&self.valid, &other.valid)
    }

    fn checkout_time(&self) -> Duration {
        self.checkout_at.elapsed()
    }

    fn idle_time(&self) -> Duration {
        self.last_used_at.elapsed()
    }
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("id", &self.id)
            .field("valid", &self.is_valid_flag())
            .field("type_code", &self.type_code)
            .finish()
    }
}

/// Aggregated mutable pool state, guarded by the pool monitor.
struct PoolState {
    config: PoolConfig,
    expected_type_code: u64,
    idle: VecDeque<PoolEntry>,
    /// Ordered by checkout time, oldest first
    active: Vec<PoolEntry>,
    request_count: u64,
    accumulated_request_time: Duration,
    accumulated_checkout_time: Duration,
    claimed_overdue_connection_count: u64,
    accumulated_checkout_time_of_overdue_connections: Duration,
    had_to_wait_count: u64,
    accumulated_wait_time: Duration,
    bad_connection_count: u64,
}

impl PoolState {
    fn new(config: PoolConfig, expected_type_code: u64) -> Self {
        Self {
            config,
            expected_type_code,
            idle: VecDeque::new(),
            active: Vec::new(),
            request_count: 0,
            accumulated_request_time: Duration::ZERO,
            accumulated_checkout_time: Duration::ZERO,
            claimed_overdue_connection_count: 0,
            accumulated_checkout_time_of_overdue_connections: Duration::ZERO,
            had_to_wait_count: 0,
            accumulated_wait_time: Duration::ZERO,
            bad_connection_count: 0,
        }
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            request_count: self.request_count,
            accumulated_request_time: self.accumulated_request_time,
            accumulated_checkout_time: self.accumulated_checkout_time,
            claimed_overdue_connection_count: self.claimed_overdue_connection_count,
            accumulated_checkout_time_of_overdue_connections: self
                .accumulated_checkout_time_of_overdue_connections,
            had_to_wait_count: self.had_to_wait_count,
            accumulated_wait_time: self.accumulated_wait_time,
            bad_connection_count: self.bad_connection_count,
            idle_connections: self.idle.len(),
            active_connections: self.active.len(),
        }
    }

    fn bad_connection_budget(&self) -> usize {
        self.config.max_idle_connections + self.config.bad_connection_tolerance
    }
}

/// State shared between the data source, its clones and outstanding handles.
struct PoolShared {
    datasource: UnpooledDataSource,
    state: Mutex<PoolState>,
    available: Condvar,
    next_conn_id: AtomicU64,
}

/// Fingerprint of the connection identity configuration. Connections carry
/// the fingerprint they were checked out under; a mismatch on release means
/// the pool was reconfigured and the connection must not be reused.
fn assemble_type_code(url: &str, username: Option<&str>, password: Option<&str>) -> u64 {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    username.hash(&mut hasher);
    password.hash(&mut hasher);
    hasher.finish()
}

/// Roll back if the session is not in auto-commit mode.
fn roll_back_if_needed(conn: &mut dyn Connection) -> Result<()> {
    if !conn.auto_commit()? {
        conn.rollback()?;
    }
    Ok(())
}

/// Invalidate an entry and close its physical connection, swallowing errors.
fn retire_entry(entry: &PoolEntry) {
    entry.invalidate();
    let mut real = entry.real.lock();
    if let Err(e) = roll_back_if_needed(real.as_mut()) {
        debug!("could not roll back connection {}: {}", entry.id, e);
    }
    if let Err(e) = real.close() {
        debug!("error closing connection {}: {}", entry.id, e);
    }
}

impl PoolShared {
    /// Core acquire loop. Four outcomes per pass: reuse an idle entry, grow
    /// the pool, reclaim an overdue checkout, or wait one slice and retry.
    fn pop_connection(&self, username: Option<&str>, password: Option<&str>) -> Result<PoolEntry> {
        let started = Instant::now();
        let mut counted_wait = false;
        let mut local_bad_connection_count: usize = 0;

        loop {
            let mut state = self.state.lock();
            let mut conn: Option<PoolEntry> = None;

            if let Some(entry) = state.idle.pop_front() {
                debug!("checked out connection {} from pool", entry.id);
                conn = Some(entry);
            } else if state.active.len() < state.config.max_active_connections {
                match self.datasource.get_connection_as(username, password) {
                    Ok(real) => {
                        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
                        debug!("created connection {}", id);
                        conn = Some(PoolEntry::new(real, id, 0));
                    }
                    Err(e) => {
                        debug!("failed to open a new connection: {}", e);
                        state.bad_connection_count += 1;
                        local_bad_connection_count += 1;
                        if local_bad_connection_count > state.bad_connection_budget() {
                            error!("could not get a good connection to the database");
                            return Err(Error::NoGoodConnection {
                                message: "could not get a good connection to the database"
                                    .to_string(),
                                source: Some(Box::new(e)),
                            });
                        }
                        continue;
                    }
                }
            } else {
                // Saturated. Inspect the oldest checkout.
                let overdue = state
                    .active
                    .first()
                    .map(PoolEntry::checkout_time)
                    .filter(|checkout| *checkout > state.config.max_checkout_time);
                if let Some(longest_checkout) = overdue {
                    state.claimed_overdue_connection_count += 1;
                    state.accumulated_checkout_time_of_overdue_connections += longest_checkout;
                    state.accumulated_checkout_time += longest_checkout;
                    let oldest = state.active.remove(0);
                    // The holder may be mid-statement; do not stall the pool
                    // on its lock. The connection is already suspect.
                    match oldest.real.try_lock() {
                        Some(mut real) => {
                            if let Err(e) = roll_back_if_needed(real.as_mut()) {
                                debug!("bad connection, could not roll back: {}", e);
                            }
                        }
                        None => {
                            debug!("overdue connection {} is busy, claiming as is", oldest.id);
                        }
                    }
                    let entry = oldest.rewrap();
                    oldest.invalidate();
                    debug!("claimed overdue connection {}", entry.id);
                    conn = Some(entry);
                } else {
                    if !counted_wait {
                        state.had_to_wait_count += 1;
                        counted_wait = true;
                    }
                    let time_to_wait = state.config.time_to_wait;
                    debug!("waiting as long as {:?} for connection", time_to_wait);
                    let wait_started = Instant::now();
                    let _ = self.available.wait_for(&mut state, time_to_wait);
                    state.accumulated_wait_time += wait_started.elapsed();
                    continue;
                }
            }

            let Some(mut entry) = conn else {
                // Every armed branch either set a candidate or looped; a
                // bare fall-through would be a bookkeeping bug.
                return Err(Error::pool_exhausted(
                    "unknown severe error condition, the pool returned no connection",
                ));
            };

            if entry.is_valid_flag() && Self::ping_connection(&entry, &state.config) {
                // Clear any prior transaction before handing the session out.
                {
                    let mut real = entry.real.lock();
                    if let Err(e) = roll_back_if_needed(real.as_mut()) {
                        if let Err(close_err) = real.close() {
                            debug!("error closing connection {}: {}", entry.id, close_err);
                        }
                        entry.invalidate();
                        return Err(e);
                    }
                }
                let ds_config = self.datasource.config();
                let user = username.or(ds_config.username.as_deref());
                let pass = password.or(ds_config.password.as_deref());
                entry.type_code = assemble_type_code(&ds_config.url, user, pass);
                let now = Instant::now();
                entry.checkout_at = now;
                entry.last_used_at = now;
                state.active.push(entry.clone());
                state.request_count += 1;
                state.accumulated_request_time += started.elapsed();
                return Ok(entry);
            }

            debug!(
                "a bad connection ({}) was returned from the pool, getting another connection",
                entry.id
            );
            state.bad_connection_count += 1;
            local_bad_connection_count += 1;
            if local_bad_connection_count > state.bad_connection_budget() {
                error!("could not get a good connection to the database");
                return Err(Error::no_good_connection(
                    "could not get a good connection to the database",
                ));
            }
        }
    }

    /// Release protocol. Returns the entry to the idle list when it is still
    /// usable, still matches the pool's fingerprint and idle capacity
    /// remains; otherwise closes the physical connection.
    fn push_connection(&self, entry: PoolEntry) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(pos) = state.active.iter().position(|e| e.same_wrapper(&entry)) {
            state.active.remove(pos);
        }

        if !(entry.is_valid_flag() && Self::ping_connection(&entry, &state.config)) {
            debug!(
                "a bad connection ({}) attempted to return to the pool, discarding connection",
                entry.id
            );
            state.bad_connection_count += 1;
            return Ok(());
        }

        state.accumulated_checkout_time += entry.checkout_time();

        if state.idle.len() < state.config.max_idle_connections
            && entry.type_code == state.expected_type_code
        {
            // Clear the caller's transaction before other threads can see
            // the connection; a failure here discards the connection and
            // surfaces to the releasing caller.
            {
                let mut real = entry.real.lock();
                if let Err(e) = roll_back_if_needed(real.as_mut()) {
                    if let Err(close_err) = real.close() {
                        debug!("error closing connection {}: {}", entry.id, close_err);
                    }
                    entry.invalidate();
                    return Err(e);
                }
            }
            let fresh = entry.rewrap();
            state.idle.push_back(fresh);
            entry.invalidate();
            debug!("returned connection {} to pool", entry.id);
            self.available.notify_all();
            Ok(())
        } else {
            // Idle list saturated or the pool was reconfigured under us.
            let rollback_result = {
                let mut real = entry.real.lock();
                let result = roll_back_if_needed(real.as_mut());
                if let Err(e) = real.close() {
                    debug!("error closing connection {}: {}", entry.id, e);
                }
                result
            };
            entry.invalidate();
            debug!("closed connection {}", entry.id);
            rollback_result
        }
    }

    /// Liveness probe. An is-closed check, then the configured ping query
    /// when enabled and the entry has been idle past the threshold. A failed
    /// probe closes the physical connection and reports it unusable.
    fn ping_connection(entry: &PoolEntry, config: &PoolConfig) -> bool {
        let mut real = entry.real.lock();

        match real.is_closed() {
            Ok(false) => {}
            Ok(true) => return false,
            Err(e) => {
                debug!("connection {} is bad: {}", entry.id, e);
                return false;
            }
        }

        if !config.ping_enabled {
            return true;
        }
        let Some(threshold) = config.ping_connections_not_used_for else {
            return true;
        };
        if entry.idle_time() <= threshold {
            return true;
        }

        debug!("testing connection {}", entry.id);
        let mut outcome = real.query(&config.ping_query).map(|_| ());
        if outcome.is_ok() {
            outcome = roll_back_if_needed(real.as_mut());
        }
        match outcome {
            Ok(()) => {
                debug!("connection {} is good", entry.id);
                true
            }
            Err(e) => {
                warn!(
                    "execution of ping query '{}' failed: {}",
                    config.ping_query, e
                );
                if let Err(close_err) = real.close() {
                    debug!("error closing connection {}: {}", entry.id, close_err);
                }
                debug!("connection {} is bad: {}", entry.id, e);
                false
            }
        }
    }

    fn force_close_all(&self) {
        let mut state = self.state.lock();
        self.force_close_all_locked(&mut state);
    }

    /// Drain both lists, rolling back and closing every connection, and
    /// recompute the expected fingerprint. Per-connection errors are
    /// swallowed.
    fn force_close_all_locked(&self, state: &mut PoolState) {
        let ds_config = self.datasource.config();
        state.expected_type_code = assemble_type_code(
            &ds_config.url,
            ds_config.username.as_deref(),
            ds_config.password.as_deref(),
        );

        let active: Vec<PoolEntry> = state.active.drain(..).collect();
        for entry in active.into_iter().rev() {
            retire_entry(&entry);
        }
        let idle: Vec<PoolEntry> = state.idle.drain(..).collect();
        for entry in idle.into_iter().rev() {
            retire_entry(&entry);
        }
        debug!("pooled data source forcefully closed/removed all connections");
    }

    fn stats(&self) -> PoolStats {
        self.state.lock().snapshot()
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let active: Vec<PoolEntry> = state.active.drain(..).collect();
        for entry in &active {
            retire_entry(entry);
        }
        let idle: Vec<PoolEntry> = state.idle.drain(..).collect();
        for entry in &idle {
            retire_entry(entry);
        }
    }
}

/// A synchronous, thread-safe pooled data source.
///
/// Cloning is cheap and shares the pool. Configuration setters that change
/// the connection identity (URL, credentials, session defaults) or the pool
/// geometry drain the pool via [`PooledDataSource::force_close_all`] so that
/// later acquires only ever see connections minted under the new
/// configuration.
#[derive(Clone)]
pub struct PooledDataSource {
    shared: Arc<PoolShared>,
}

impl PooledDataSource {
    /// Pool the given data source with default [`PoolConfig`].
    pub fn new(datasource: UnpooledDataSource) -> Self {
        Self::with_config(datasource, PoolConfig::default())
    }

    /// Pool the given data source with an explicit configuration.
    pub fn with_config(datasource: UnpooledDataSource, config: PoolConfig) -> Self {
        let ds_config = datasource.config();
        let expected = assemble_type_code(
            &ds_config.url,
            ds_config.username.as_deref(),
            ds_config.password.as_deref(),
        );
        Self {
            shared: Arc::new(PoolShared {
                datasource,
                state: Mutex::new(PoolState::new(config, expected)),
                available: Condvar::new(),
                next_conn_id: AtomicU64::new(1),
            }),
        }
    }

    /// Acquire a connection with the configured credentials.
    ///
    /// Blocks in bounded wait slices while the pool is saturated; fails with
    /// [`Error::NoGoodConnection`] once the bad-connection retry budget for
    /// this call is exhausted.
    pub fn get_connection(&self) -> Result<PooledConnection> {
        let entry = self.shared.pop_connection(None, None)?;
        Ok(PooledConnection::new(Arc::clone(&self.shared), entry))
    }

    /// Acquire a connection with credentials overriding the configured ones
    /// for this checkout. The checkout is fingerprinted with the override;
    /// if the pool's expected fingerprint differs at release time the
    /// connection is discarded rather than idled.
    pub fn get_connection_as(&self, username: &str, password: &str) -> Result<PooledConnection> {
        let entry = self
            .shared
            .pop_connection(Some(username), Some(password))?;
        Ok(PooledConnection::new(Arc::clone(&self.shared), entry))
    }

    /// Close every active and idle connection and recompute the expected
    /// connection fingerprint. Outstanding handles become invalid.
    pub fn force_close_all(&self) {
        self.shared.force_close_all();
    }

    /// Snapshot of the pool's statistics counters.
    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// Snapshot of the pool configuration.
    pub fn config(&self) -> PoolConfig {
        self.shared.state.lock().config.clone()
    }

    /// The configured URL.
    pub fn url(&self) -> String {
        self.shared.datasource.url()
    }

    /// The configured username.
    pub fn username(&self) -> Option<String> {
        self.shared.datasource.username()
    }

    /// Replace the driver and drain the pool.
    pub fn set_driver(&self, driver: Arc<dyn crate::connection::Driver>) {
        self.shared.datasource.set_driver(driver);
        self.force_close_all();
    }

    /// Change the URL and drain the pool.
    pub fn set_url(&self, url: impl Into<String>) {
        self.shared.datasource.set_url(url);
        self.force_close_all();
    }

    /// Change the username and drain the pool.
    pub fn set_username(&self, username: impl Into<String>) {
        self.shared.datasource.set_username(username);
        self.force_close_all();
    }

    /// Change the password and drain the pool.
    pub fn set_password(&self, password: impl Into<String>) {
        self.shared.datasource.set_password(password);
        self.force_close_all();
    }

    /// Change the auto-commit default and drain the pool.
    pub fn set_default_auto_commit(&self, auto_commit: bool) {
        self.shared.datasource.set_auto_commit(auto_commit);
        self.force_close_all();
    }

    /// Change the default isolation level and drain the pool.
    pub fn set_default_isolation(&self, level: Option<IsolationLevel>) {
        self.shared.datasource.set_default_isolation(level);
        self.force_close_all();
    }

    /// Change the default network timeout and drain the pool.
    pub fn set_default_network_timeout(&self, timeout: Option<Duration>) {
        self.shared.datasource.set_network_timeout(timeout);
        self.force_close_all();
    }

    /// Set a driver property and drain the pool.
    pub fn set_driver_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.shared.datasource.set_property(key, value);
        self.force_close_all();
    }

    /// Replace all driver properties and drain the pool.
    pub fn set_driver_properties(
        &self,
        properties: std::collections::HashMap<String, String>,
    ) {
        self.shared.datasource.set_properties(properties);
        self.force_close_all();
    }

    /// Change the active-connection cap and drain the pool.
    pub fn set_max_active_connections(&self, n: usize) {
        let mut state = self.shared.state.lock();
        state.config.max_active_connections = n;
        self.shared.force_close_all_locked(&mut state);
    }

    /// Change the idle-connection cap and drain the pool.
    pub fn set_max_idle_connections(&self, n: usize) {
        let mut state = self.shared.state.lock();
        state.config.max_idle_connections = n;
        self.shared.force_close_all_locked(&mut state);
    }

    /// Change the reclaim deadline and drain the pool.
    pub fn set_max_checkout_time(&self, d: Duration) {
        let mut state = self.shared.state.lock();
        state.config.max_checkout_time = d;
        self.shared.force_close_all_locked(&mut state);
    }

    /// Change the wait slice and drain the pool.
    pub fn set_time_to_wait(&self, d: Duration) {
        let mut state = self.shared.state.lock();
        state.config.time_to_wait = d;
        self.shared.force_close_all_locked(&mut state);
    }

    /// Change the bad-connection tolerance. Does not drain the pool; the
    /// tolerance does not affect connection identity.
    pub fn set_bad_connection_tolerance(&self, n: usize) {
        self.shared.state.lock().config.bad_connection_tolerance = n;
    }

    /// Change the ping query and drain the pool.
    pub fn set_ping_query(&self, sql: impl Into<String>) {
        let mut state = self.shared.state.lock();
        state.config.ping_query = sql.into();
        self.shared.force_close_all_locked(&mut state);
    }

    /// Enable or disable the ping query and drain the pool.
    pub fn set_ping_enabled(&self, enabled: bool) {
        let mut state = self.shared.state.lock();
        state.config.ping_enabled = enabled;
        self.shared.force_close_all_locked(&mut state);
    }

    /// Change the ping idle threshold and drain the pool.
    pub fn set_ping_connections_not_used_for(&self, threshold: Option<Duration>) {
        let mut state = self.shared.state.lock();
        state.config.ping_connections_not_used_for = threshold;
        self.shared.force_close_all_locked(&mut state);
    }
}

impl fmt::Debug for PooledDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("PooledDataSource")
            .field("idle", &stats.idle_connections)
            .field("active", &stats.active_connections)
            .finish_non_exhaustive()
    }
}

/// A connection checked out from a [`PooledDataSource`].
///
/// Exposes the same capability set as [`Connection`] by delegation; every
/// call is refused with [`Error::ConnectionInvalid`] once the pool has
/// invalidated the checkout (after release, a force-close or an overdue
/// reclaim). Disposing the handle returns the connection to the pool:
/// explicitly via [`PooledConnection::close`], which surfaces any rollback
/// error, or implicitly on drop, which logs and swallows it.
pub struct PooledConnection {
    shared: Arc<PoolShared>,
    entry: Option<PoolEntry>,
}

impl PooledConnection {
    fn new(shared: Arc<PoolShared>, entry: PoolEntry) -> Self {
        Self {
            shared,
            entry: Some(entry),
        }
    }

    fn entry(&self) -> Result<&PoolEntry> {
        match &self.entry {
            Some(entry) if entry.is_valid_flag() => Ok(entry),
            _ => Err(Error::ConnectionInvalid),
        }
    }

    /// Execute a query that returns rows
    pub fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let entry = self.entry()?;
        entry.real.lock().query(sql)
    }

    /// Execute a statement that modifies data, returns affected row count
    pub fn execute(&mut self, sql: &str) -> Result<u64> {
        let entry = self.entry()?;
        entry.real.lock().execute(sql)
    }

    /// Commit the current transaction
    pub fn commit(&mut self) -> Result<()> {
        let entry = self.entry()?;
        entry.real.lock().commit()
    }

    /// Roll back the current transaction
    pub fn rollback(&mut self) -> Result<()> {
        let entry = self.entry()?;
        entry.real.lock().rollback()
    }

    /// Whether the session is in auto-commit mode
    pub fn auto_commit(&self) -> Result<bool> {
        let entry = self.entry()?;
        entry.real.lock().auto_commit()
    }

    /// Switch auto-commit mode
    pub fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
        let entry = self.entry()?;
        entry.real.lock().set_auto_commit(auto_commit)
    }

    /// Set the transaction isolation level
    pub fn set_transaction_isolation(&mut self, level: IsolationLevel) -> Result<()> {
        let entry = self.entry()?;
        entry.real.lock().set_transaction_isolation(level)
    }

    /// Set the network timeout for database operations
    pub fn set_network_timeout(&mut self, timeout: Duration) -> Result<()> {
        let entry = self.entry()?;
        entry.real.lock().set_network_timeout(timeout)
    }

    /// Whether the physical session has been closed
    pub fn is_closed(&self) -> Result<bool> {
        let entry = self.entry()?;
        entry.real.lock().is_closed()
    }

    /// Whether this checkout is still valid. A handle turns invalid when it
    /// is released, reclaimed as overdue, or the pool is force-closed.
    pub fn is_valid(&self) -> bool {
        self.entry
            .as_ref()
            .map(PoolEntry::is_valid_flag)
            .unwrap_or(false)
    }

    /// Identifier of the underlying physical connection. Stable across
    /// release and re-checkout of the same physical connection.
    pub fn connection_id(&self) -> Option<u64> {
        self.entry.as_ref().map(|e| e.id)
    }

    /// Recover the shared physical connection for diagnostic use. The pool
    /// keeps no record of this access; do not close the connection through
    /// it.
    pub fn raw_connection(&self) -> Option<SharedConnection> {
        self.entry.as_ref().map(|e| Arc::clone(&e.real))
    }

    /// Return the connection to the pool.
    ///
    /// The pool rolls back any open transaction before reusing or retiring
    /// the connection; a rollback failure surfaces here. Dropping the handle
    /// performs the same release but swallows the error.
    pub fn close(mut self) -> Result<()> {
        match self.entry.take() {
            Some(entry) => self.shared.push_connection(entry),
            None => Ok(()),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            if let Err(e) = self.shared.push_connection(entry) {
                debug!("error returning connection to pool: {}", e);
            }
        }
    }
}

/// Handles compare equal when they wrap the same physical connection, even
/// across release and re-checkout.
impl PartialEq for PooledConnection {
    fn eq(&self, other: &Self) -> bool {
        match (&self.entry, &other.entry) {
            (Some(a), Some(b)) => a.id == b.id,
            _ => false,
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.connection_id())
            .field("valid", &self.is_valid())
            .finish()
    }
}
