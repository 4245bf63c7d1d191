//! Synchronous pool against the mock server.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{MockServer, standard_script};
use zero_mysql::sync::{Pool, PoolManager};
use zero_mysql::{Error, Opts, TransactionId};

fn pool(server: &MockServer, max_size: usize) -> Arc<Pool> {
    Arc::new(Pool::new(Opts {
        pool_max_size: max_size,
        ..server.opts()
    }))
}

#[test]
fn test_checkout_blocks_at_max_size() {
    let server = MockServer::start(standard_script);
    let pool = pool(&server, 2);

    let first = pool.get().unwrap();
    let _second = pool.get().unwrap();
    assert_eq!(pool.size(), 2);
    assert!(matches!(
        pool.get_timeout(Duration::ZERO),
        Err(Error::PoolExhausted)
    ));

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let start = Instant::now();
            let mut conn = pool.get_timeout(Duration::from_secs(5)).unwrap();
            conn.ping().unwrap();
            start.elapsed()
        })
    };
    thread::sleep(Duration::from_millis(200));
    drop(first);
    let waited = waiter.join().unwrap();
    assert!(waited >= Duration::from_millis(150));
    assert_eq!(pool.size(), 2);
}

#[test]
fn test_checkout_times_out() {
    let server = MockServer::start(standard_script);
    let pool = pool(&server, 1);
    let _held = pool.get().unwrap();
    let err = pool.get_timeout(Duration::from_millis(100)).unwrap_err();
    assert!(matches!(err, Error::PoolExhausted));
}

#[test]
fn test_connection_reused_after_server_error() {
    let server = MockServer::start(standard_script);
    let pool = pool(&server, 4);
    {
        let mut conn = pool.get().unwrap();
        assert!(conn.query_drop("SELECT 1/0").is_err());
        assert!(!conn.is_broken());
    }
    assert_eq!(pool.idle_count(), 1);

    let mut conn = pool.get().unwrap();
    let row: Option<(i64,)> = conn.query_first("SELECT 1").unwrap();
    assert_eq!(row, Some((1,)));
    assert_eq!(server.connections(), 1);
}

#[test]
fn test_broken_connection_is_discarded() {
    let server = MockServer::start(standard_script);
    let pool = pool(&server, 4);
    {
        let mut conn = pool.get().unwrap();
        assert!(conn.query_drop("BOOM").is_err());
        assert!(conn.is_broken());
    }
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.size(), 0);

    pool.get().unwrap().ping().unwrap();
    assert_eq!(server.connections(), 2);
}

#[test]
fn test_clear_retires_checked_out_connections() {
    let server = MockServer::start(standard_script);
    let pool = pool(&server, 4);
    let conn = pool.get().unwrap();
    drop(pool.get().unwrap());
    assert_eq!(pool.idle_count(), 1);

    pool.clear();
    assert_eq!(pool.idle_count(), 0);
    drop(conn);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.size(), 0);
}

#[test]
fn test_warm_up_fills_min_size() {
    let server = MockServer::start(standard_script);
    let pool = Arc::new(Pool::new(Opts {
        pool_min_size: 3,
        ..server.opts()
    }));
    pool.warm_up().unwrap();
    assert_eq!(pool.idle_count(), 3);
    assert_eq!(server.connections(), 3);
}

#[test]
fn test_transaction_keeps_connection() {
    let server = MockServer::start(standard_script);
    let pool = pool(&server, 4);
    let tx = TransactionId(7);

    let first_id = {
        let mut conn = pool.get_for_transaction(tx).unwrap();
        conn.query_drop("BEGIN").unwrap();
        conn.connection_id()
    };
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.size(), 1);

    let second_id = pool.get_for_transaction(tx).unwrap().connection_id();
    assert_eq!(first_id, second_id);

    pool.complete_transaction(tx);
    assert_eq!(pool.idle_count(), 1);
}

#[test]
fn test_pool_identity() {
    let manager = PoolManager::new();
    let base = Opts {
        host: "db.local".into(),
        user: "app".into(),
        ..Opts::default()
    };
    let traced = Opts {
        trace_protocol: true,
        pool_max_size: 5,
        ..base.clone()
    };
    let other_host = Opts {
        host: "db2.local".into(),
        ..base.clone()
    };
    let other_user = Opts {
        user: "admin".into(),
        ..base.clone()
    };

    let pool = manager.get_pool(&base);
    assert!(Arc::ptr_eq(&pool, &manager.get_pool(&traced)));
    assert!(!Arc::ptr_eq(&pool, &manager.get_pool(&other_host)));
    assert!(!Arc::ptr_eq(&pool, &manager.get_pool(&other_user)));
}

#[test]
fn test_manager_checkout() {
    let server = MockServer::start(standard_script);
    let manager = PoolManager::new();
    let opts = server.opts();
    drop(manager.get_conn(&opts).unwrap());
    assert_eq!(manager.get_pool(&opts).idle_count(), 1);
    manager.clear_all_pools();
    assert_eq!(manager.get_pool(&opts).idle_count(), 0);
}

#[test]
fn test_idle_timeout_eviction_stops_at_min_size() {
    let server = MockServer::start(standard_script);
    let pool = Arc::new(Pool::new(Opts {
        pool_min_size: 1,
        pool_max_size: 3,
        connection_idle_timeout: Duration::from_millis(50),
        ..server.opts()
    }));
    let held: Vec<_> = (0..3).map(|_| pool.get().unwrap()).collect();
    drop(held);
    assert_eq!(pool.idle_count(), 3);

    thread::sleep(Duration::from_millis(100));
    let conn = pool.get().unwrap();
    assert_eq!(pool.size(), 1);
    assert_eq!(pool.idle_count(), 0);
    drop(conn);
    assert_eq!(server.connections(), 3);
}

#[test]
fn test_expired_connection_is_replaced() {
    let server = MockServer::start(standard_script);
    let pool = Arc::new(Pool::new(Opts {
        pool_min_size: 1,
        connection_lifetime: Some(Duration::from_millis(100)),
        ..server.opts()
    }));
    let first_id = pool.get().unwrap().connection_id();
    assert_eq!(pool.idle_count(), 1);

    thread::sleep(Duration::from_millis(150));
    let second_id = pool.get().unwrap().connection_id();
    assert_ne!(first_id, second_id);
    assert_eq!(pool.size(), 1);
    assert_eq!(server.connections(), 2);
}

#[test]
fn test_unbounded_pool_timeout_waits_for_release() {
    let opts = Opts::try_from("mysql://app@localhost/db?pool_timeout=18446744073709551615").unwrap();
    assert_eq!(opts.pool_timeout, Duration::from_secs(u64::MAX));

    let server = MockServer::start(standard_script);
    let pool = Arc::new(Pool::new(Opts {
        pool_max_size: 1,
        pool_timeout: Duration::from_secs(u64::MAX),
        ..server.opts()
    }));
    let held = pool.get().unwrap();
    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.get().map(|conn| conn.connection_id()))
    };
    thread::sleep(Duration::from_millis(100));
    let held_id = held.connection_id();
    drop(held);
    assert_eq!(waiter.join().unwrap().unwrap(), held_id);
}
