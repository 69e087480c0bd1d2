//! Multi-threaded pool behavior scenarios
//!
//! Timings use generous margins so the assertions hold on slow CI workers;
//! sleeps only ever make waits longer, which the assertions tolerate.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use cistern::prelude::*;
use cistern_integration_tests::helpers::{init_tracing, pooled};

#[test]
fn test_saturation_wait_then_release() {
    init_tracing();
    let (pool, _driver, journal) = pooled(
        PoolConfig::default()
            .with_max_active_connections(1)
            .with_time_to_wait(Duration::from_millis(200)),
    );

    let (acquired_tx, acquired_rx) = mpsc::channel();
    let holder = {
        let pool = pool.clone();
        thread::spawn(move || {
            let conn = pool.get_connection().expect("holder acquire");
            acquired_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(150));
            conn.close().expect("holder release");
        })
    };

    acquired_rx.recv().unwrap();
    let waiter = pool.get_connection().expect("waiter acquire");

    holder.join().unwrap();

    let stats = pool.stats();
    assert!(stats.had_to_wait_count >= 1);
    assert!(stats.accumulated_wait_time >= Duration::from_millis(80));
    // The single physical connection served both threads.
    assert_eq!(journal.opened(), 1);
    drop(waiter);
}

#[test]
fn test_wait_counted_once_across_slices() {
    init_tracing();
    let (pool, _driver, _journal) = pooled(
        PoolConfig::default()
            .with_max_active_connections(1)
            .with_time_to_wait(Duration::from_millis(40)),
    );

    let (acquired_tx, acquired_rx) = mpsc::channel();
    let holder = {
        let pool = pool.clone();
        thread::spawn(move || {
            let conn = pool.get_connection().expect("holder acquire");
            acquired_tx.send(()).unwrap();
            // Long enough that the waiter times out several wait slices and
            // re-enters the selection loop each time.
            thread::sleep(Duration::from_millis(150));
            conn.close().expect("holder release");
        })
    };

    acquired_rx.recv().unwrap();
    let waiter = pool.get_connection().expect("waiter acquire");
    holder.join().unwrap();

    let stats = pool.stats();
    // One acquire call counts as one waiter no matter how many slices.
    assert_eq!(stats.had_to_wait_count, 1);
    assert!(stats.accumulated_wait_time >= Duration::from_millis(80));
    drop(waiter);
}

#[test]
fn test_overdue_checkout_is_reclaimed() {
    init_tracing();
    let (pool, _driver, journal) = pooled(
        PoolConfig::default()
            .with_max_active_connections(1)
            .with_max_checkout_time(Duration::from_millis(50))
            .with_time_to_wait(Duration::from_millis(100)),
    );

    let (acquired_tx, acquired_rx) = mpsc::channel();
    let leaker = {
        let pool = pool.clone();
        thread::spawn(move || {
            let mut conn = pool.get_connection().expect("leaker acquire");
            acquired_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(250));
            // The pool reclaimed this checkout while we slept.
            let err = conn.query("SELECT 1").unwrap_err();
            assert!(matches!(err, Error::ConnectionInvalid));
            assert!(!conn.is_valid());
        })
    };

    acquired_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(100));
    let claimed = pool.get_connection().expect("claimer acquire");

    let stats = pool.stats();
    assert_eq!(stats.claimed_overdue_connection_count, 1);
    assert!(
        stats.accumulated_checkout_time_of_overdue_connections >= Duration::from_millis(50)
    );
    // Reclamation reassigns the physical connection instead of closing it.
    assert_eq!(journal.opened(), 1);
    assert_eq!(journal.closed(), 0);

    leaker.join().unwrap();
    drop(claimed);
}

#[test]
fn test_probe_failure_exhausts_budget() {
    init_tracing();
    let (pool, driver, journal) = pooled(
        PoolConfig::default()
            .with_max_idle_connections(0)
            .with_bad_connection_tolerance(2)
            .with_ping_enabled(true)
            .with_ping_query("/* ping */ SELECT 1"),
    );
    driver.set_fail_query(true);

    let err = pool.get_connection().unwrap_err();
    assert!(matches!(err, Error::NoGoodConnection { .. }));

    // idle cap (0) + tolerance (2) + 1 attempts, each probed and closed.
    assert_eq!(journal.opened(), 3);
    assert_eq!(journal.closed(), 3);
    assert_eq!(journal.double_closes(), 0);
    assert_eq!(pool.stats().bad_connection_count, 3);
}

#[test]
fn test_idle_connection_gone_bad_is_replaced() {
    init_tracing();
    let (pool, driver, journal) = pooled(
        PoolConfig::default()
            .with_ping_enabled(true)
            .with_ping_query("/* ping */ SELECT 1")
            .with_ping_connections_not_used_for(Some(Duration::ZERO)),
    );

    // Seed one idle connection.
    pool.get_connection().unwrap().close().unwrap();
    assert_eq!(pool.stats().idle_connections, 1);

    // It goes bad while idle; the next acquire probes it, discards it and
    // mints a replacement.
    driver.set_fail_query(true);
    let fresh = pool.get_connection();
    driver.set_fail_query(false);

    // The idle candidate failed its probe and was closed; the freshly minted
    // replacement also failed its probe until the budget ran out. Either way
    // the bad idle connection never reached the caller.
    assert_eq!(journal.closed(), journal.opened());
    assert!(fresh.is_err());
    assert!(pool.stats().bad_connection_count >= 1);
}

#[test]
fn test_release_rollback_failure_propagates() {
    init_tracing();
    let (pool, driver, journal) = pooled(PoolConfig::default());
    pool.set_default_auto_commit(false);

    let conn = pool.get_connection().expect("acquire");
    driver.set_fail_rollback(true);

    let err = conn.close().unwrap_err();
    assert!(matches!(err, Error::Transaction { .. }));

    // The connection was discarded, not idled.
    let stats = pool.stats();
    assert_eq!(stats.idle_connections, 0);
    assert_eq!(stats.active_connections, 0);
    assert_eq!(journal.closed(), 1);
}

#[test]
fn test_drop_releases_and_swallows() {
    init_tracing();
    let (pool, driver, journal) = pooled(PoolConfig::default());
    pool.set_default_auto_commit(false);

    let conn = pool.get_connection().expect("acquire");
    driver.set_fail_rollback(true);
    drop(conn); // must not panic

    let stats = pool.stats();
    assert_eq!(stats.idle_connections, 0);
    assert_eq!(stats.active_connections, 0);
    assert_eq!(journal.closed(), 1);
}

#[test]
fn test_stale_handle_release_counts_bad_connection() {
    init_tracing();
    let (pool, _driver, journal) = pooled(
        PoolConfig::default()
            .with_max_active_connections(1)
            .with_max_checkout_time(Duration::from_millis(20))
            .with_time_to_wait(Duration::from_millis(50)),
    );

    let leaked = pool.get_connection().expect("first acquire");
    thread::sleep(Duration::from_millis(50));
    // Reclaims the overdue checkout.
    let claimed = pool.get_connection().expect("second acquire");

    let before = pool.stats().bad_connection_count;
    drop(leaked); // stale wrapper: counted bad, current checkout untouched
    let stats = pool.stats();
    assert_eq!(stats.bad_connection_count, before + 1);
    assert_eq!(stats.active_connections, 1);
    assert_eq!(journal.closed(), 0);

    drop(claimed);
}
