//! Tokio connection and pool against the mock server.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{MockServer, ServerConfig, standard_script};
use zero_mysql::tokio::{Conn, Pool};
use zero_mysql::{CollectHandler, Error, Opts};

async fn connect(server: &MockServer) -> Conn {
    Conn::new(server.opts()).await.unwrap()
}

/// Wait for spawned check-ins to land.
async fn settle(pool: &Pool, idle: usize) {
    for _ in 0..100 {
        if pool.idle_count() == idle {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_select_one_end_to_end() {
    let server = MockServer::start(standard_script);
    let mut conn = connect(&server).await;

    let mut result = conn.query_iter("SELECT 1").await.unwrap();
    let row: Option<(i64,)> = result.next_row().await.unwrap();
    assert_eq!(row, Some((1,)));
    let row: Option<(i64,)> = result.next_row().await.unwrap();
    assert_eq!(row, None);
    result.finish().await.unwrap();

    assert!(!conn.is_broken());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_dropped_result_is_drained_by_next_command() {
    let server = MockServer::start(standard_script);
    let mut conn = connect(&server).await;
    let mut result = conn.query_iter("SELECT id, name FROM users").await.unwrap();
    let row: Option<(i64, Option<String>)> = result.next_row().await.unwrap();
    assert_eq!(row, Some((1, Some("alice".into()))));
    drop(result);
    assert!(!conn.is_broken());
    assert!(conn.has_pending_result());

    let row: Option<(i64,)> = conn.query_first("SELECT 1").await.unwrap();
    assert_eq!(row, Some((1,)));
    assert!(!conn.has_pending_result());
    assert!(!conn.is_broken());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dropped_result_is_drained_on_checkin() {
    let server = MockServer::start(standard_script);
    let pool = Arc::new(Pool::new(server.opts()));
    let id = {
        let mut conn = pool.get().await.unwrap();
        let result = conn.query_iter("SELECT id, name FROM users").await.unwrap();
        drop(result);
        assert!(conn.has_pending_result());
        conn.connection_id()
    };
    settle(&pool, 1).await;
    assert_eq!(pool.idle_count(), 1);

    let mut conn = pool.get().await.unwrap();
    assert_eq!(conn.connection_id(), id);
    assert!(!conn.has_pending_result());
    let row: Option<(i64,)> = conn.query_first("SELECT 1").await.unwrap();
    assert_eq!(row, Some((1,)));
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_session_usable_after_server_error() {
    let server = MockServer::start(standard_script);
    let mut conn = connect(&server).await;

    let err = conn.query_drop("SELECT 1/0").await.unwrap_err();
    assert_eq!(err.server_error().map(|e| e.code), Some(1365));
    assert!(!conn.is_broken());

    let rows: Vec<(i64, Option<String>)> =
        conn.query_collect("SELECT id, name FROM users").await.unwrap();
    assert_eq!(rows, vec![(1, Some("alice".into())), (2, None)]);
}

#[tokio::test]
async fn test_socket_close_marks_connection_broken() {
    let server = MockServer::start(standard_script);
    let mut conn = connect(&server).await;
    assert!(conn.query_drop("BOOM").await.is_err());
    assert!(conn.is_broken());
    assert!(matches!(conn.ping().await, Err(Error::ConnectionBroken)));
}

#[tokio::test]
async fn test_caching_sha2_fast_auth() {
    let server = MockServer::with_config(
        ServerConfig {
            plugin: Some("caching_sha2_password"),
            ..ServerConfig::default()
        },
        standard_script,
    );
    connect(&server).await.ping().await.unwrap();
    assert_eq!(server.authenticated_plugins(), vec!["caching_sha2_password"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_kill_query_on_timeout() {
    let server = MockServer::start(standard_script);
    let opts = Opts {
        read_timeout: Some(Duration::from_millis(200)),
        ..server.opts()
    };
    let mut conn = Conn::new(opts).await.unwrap();
    let id = conn.connection_id();

    let err = conn.query_drop("SELECT SLEEP(10)").await.unwrap_err();
    assert!(err.is_timeout());
    assert!(!conn.is_broken());
    assert!(server.queries().contains(&format!("KILL QUERY {}", id)));
    assert_eq!(server.queries_on(id), vec!["SELECT SLEEP(10)", "DO 0"]);

    let row: Option<(i64,)> = conn.query_first("SELECT 1").await.unwrap();
    assert_eq!(row, Some((1,)));
}

#[tokio::test]
async fn test_compressed_round_trip() {
    let server = MockServer::with_config(
        ServerConfig {
            compress: true,
            ..ServerConfig::default()
        },
        standard_script,
    );
    let opts = Opts {
        compress: true,
        ..server.opts()
    };
    let mut conn = Conn::new(opts).await.unwrap();
    assert_eq!(server.compressed_connections(), 1);

    let row: Option<(String,)> = conn.query_first("SELECT REPEAT('a', 10000)").await.unwrap();
    assert_eq!(row.map(|(s,)| s.len()), Some(10_000));

    let long = format!("SELECT '{}'", "b".repeat(300));
    conn.query_drop(&long).await.unwrap();
    assert!(server.queries().contains(&long));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pool_checkout_blocks_at_max_size() {
    let server = MockServer::start(standard_script);
    let pool = Arc::new(Pool::new(Opts {
        pool_max_size: 2,
        ..server.opts()
    }));

    let first = pool.get().await.unwrap();
    let _second = pool.get().await.unwrap();
    assert!(matches!(
        pool.get_timeout(Duration::ZERO).await,
        Err(Error::PoolExhausted)
    ));

    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let start = Instant::now();
            let mut conn = pool.get_timeout(Duration::from_secs(5)).await.unwrap();
            conn.ping().await.unwrap();
            start.elapsed()
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(first);
    let waited = waiter.await.unwrap();
    assert!(waited >= Duration::from_millis(150));
    assert_eq!(pool.size(), 2);
}

#[tokio::test]
async fn test_pool_discards_broken_connection() {
    let server = MockServer::start(standard_script);
    let pool = Arc::new(Pool::new(server.opts()));
    {
        let mut conn = pool.get().await.unwrap();
        assert!(conn.query_drop("SELECT 1/0").await.is_err());
    }
    settle(&pool, 1).await;
    assert_eq!(pool.idle_count(), 1);

    {
        let mut conn = pool.get().await.unwrap();
        assert!(conn.query_drop("BOOM").await.is_err());
    }
    settle(&pool, 0).await;
    for _ in 0..100 {
        if pool.size() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pool.size(), 0);
}

#[tokio::test]
async fn test_prepared_statement_lifecycle() {
    let server = MockServer::start(standard_script);
    let mut conn = connect(&server).await;

    let stmt = conn.prepare("SELECT id, name FROM users WHERE id > ?").await.unwrap();
    assert_eq!(stmt.num_params(), 1);
    let rows: Vec<(i64, Option<String>)> = conn.exec_collect(&stmt, (0i64,)).await.unwrap();
    assert_eq!(rows, vec![(1, Some("alice".into())), (2, None)]);

    let mut result = conn.exec_iter(&stmt, (7u16,)).await.unwrap();
    let rows: Vec<(i64, Option<String>)> = result.collect_rows().await.unwrap();
    assert_eq!(rows.len(), 2);
    drop(result);

    let mut handler = CollectHandler::<(i64, Option<String>)>::new();
    conn.exec_fetch(&stmt, (1i64,), 1, &mut handler).await.unwrap();
    assert_eq!(handler.into_rows().len(), 2);

    conn.close_statement(&stmt).await.unwrap();
    let affected = conn
        .exec_drop("UPDATE users SET name = ? WHERE id = ?", ("bob", 2i64))
        .await
        .unwrap();
    assert_eq!(affected, 1);

    assert_eq!(
        server.statement_log(),
        vec![
            "PREPARE SELECT id, name FROM users WHERE id > ?",
            "EXECUTE 1 [0]",
            "EXECUTE 1 [7]",
            "EXECUTE 1 [1]",
            "FETCH 1 1",
            "FETCH 1 1",
            "CLOSE 1",
            "PREPARE UPDATE users SET name = ? WHERE id = ?",
            "EXECUTE 2 [bob, 2]",
            "CLOSE 2",
        ]
    );
    assert!(!conn.is_broken());
}

#[tokio::test]
async fn test_stall_mid_packet_breaks_connection() {
    let server = MockServer::start(standard_script);
    let mut conn = Conn::new(Opts {
        read_timeout: Some(Duration::from_millis(200)),
        ..server.opts()
    })
    .await
    .unwrap();

    let err = conn.query_drop("STALL").await.unwrap_err();
    assert!(matches!(err, Error::TransferTimeout("read")));
    assert!(err.is_timeout());
    assert!(conn.is_broken());
}

#[tokio::test]
async fn test_pool_zero_timeout_fails_fast() {
    let server = MockServer::start(standard_script);
    let pool = Arc::new(Pool::new(Opts {
        pool_max_size: 1,
        pool_timeout: Duration::ZERO,
        ..server.opts()
    }));
    let _held = pool.get().await.unwrap();

    let start = Instant::now();
    assert!(matches!(pool.get().await, Err(Error::PoolExhausted)));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pool_unbounded_timeout_waits_for_release() {
    let server = MockServer::start(standard_script);
    let pool = Arc::new(Pool::new(Opts {
        pool_max_size: 1,
        pool_timeout: Duration::from_secs(u64::MAX),
        ..server.opts()
    }));
    let held = pool.get().await.unwrap();
    let held_id = held.connection_id();
    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.get().await.map(|conn| conn.connection_id()) })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(held);
    assert_eq!(waiter.await.unwrap().unwrap(), held_id);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pool_serves_every_waiter_after_back_to_back_releases() {
    let server = MockServer::start(standard_script);
    let pool = Arc::new(Pool::new(Opts {
        pool_max_size: 2,
        ..server.opts()
    }));
    let first = pool.get().await.unwrap();
    let second = pool.get().await.unwrap();

    let both_served = Arc::new(tokio::sync::Barrier::new(2));
    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let both_served = Arc::clone(&both_served);
            tokio::spawn(async move {
                let conn = pool.get_timeout(Duration::from_secs(2)).await?;
                // hold it so the other waiter can only be served by the second release
                let _ = tokio::time::timeout(Duration::from_secs(3), both_served.wait()).await;
                Ok::<_, Error>(conn.connection_id())
            })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(first);
    drop(second);

    let mut ids = Vec::new();
    for waiter in waiters {
        ids.push(waiter.await.unwrap().unwrap());
    }
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(server.connections(), 2);
}
