//! Allocation and administration scenarios against the mock driver.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use sqlpool::{ConnectionState, Pool, PoolError, PooledConnection};
use sqlpool_testing::{MockDriver, MockResponse, TestFixture};

async fn pool(min: u32, max: u32) -> Pool<MockDriver> {
    pool_with(min, max, MockDriver::default()).await
}

async fn pool_with(min: u32, max: u32, driver: MockDriver) -> Pool<MockDriver> {
    Pool::new(TestFixture::new(min, max).config(), driver)
        .await
        .unwrap()
}

fn names(conns: &[Arc<PooledConnection<MockDriver>>]) -> Vec<String> {
    conns.iter().map(|c| c.name().to_owned()).collect()
}

#[tokio::test]
async fn test_pool_grows_to_max_then_fails_fast() {
    let pool = pool(2, 4).await;
    assert_eq!(pool.len(), 2);
    assert_eq!(pool.list_idle().len(), 2);

    let first = pool.acquire(None).await.unwrap();
    let second = pool.acquire(None).await.unwrap();
    assert_ne!(first.name(), second.name());
    assert_eq!(first.state(), ConnectionState::InUse);
    assert_eq!(second.state(), ConnectionState::InUse);
    assert_eq!(pool.len(), 2);

    let third = pool.acquire(None).await.unwrap();
    assert_eq!(third.name(), "mysql-3");
    assert_eq!(third.state(), ConnectionState::InUse);
    assert_eq!(pool.len(), 3);

    let fourth = pool.acquire(None).await.unwrap();
    assert_eq!(fourth.name(), "mysql-4");
    assert_eq!(pool.len(), 4);

    let err = pool.acquire(None).await.unwrap_err();
    assert!(matches!(err, PoolError::NoConnectionsAvailable { max: 4 }));
    assert!(err.is_capacity());
    assert_eq!(pool.len(), 4);
    assert_eq!(pool.driver().connects(), 4);
}

#[tokio::test]
async fn test_acquire_recovers_after_release() {
    let pool = pool(1, 1).await;

    let held = pool.acquire(None).await.unwrap();
    assert!(pool.acquire(None).await.is_err());

    held.release();
    let again = pool.acquire(None).await.unwrap();
    assert_eq!(again.name(), "mysql-1");
}

#[tokio::test]
async fn test_acquire_recovers_after_statement_completes() {
    let pool = pool(1, 1).await;

    let conn = pool.acquire(None).await.unwrap();
    conn.execute("SELECT 1", &[]).await.unwrap();
    assert!(conn.is_idle());

    let again = pool.acquire(None).await.unwrap();
    assert_eq!(again.name(), "mysql-1");
}

#[tokio::test]
async fn test_named_acquire_bypasses_state() {
    let pool = pool(2, 4).await;

    let busy = pool.acquire(None).await.unwrap();
    assert_eq!(busy.name(), "mysql-1");

    let pinned = pool.acquire(Some("mysql-1")).await.unwrap();
    assert!(Arc::ptr_eq(busy.connection(), pinned.connection()));
    assert!(!pinned.holds_claim());
    assert_eq!(pinned.state(), ConnectionState::InUse);

    drop(pinned);
    assert_eq!(busy.state(), ConnectionState::InUse);
}

#[tokio::test]
async fn test_named_acquire_creates_configured_connection() {
    let pool = pool(1, 4).await;

    let conn = pool.acquire(Some("mysql-3")).await.unwrap();
    assert_eq!(conn.name(), "mysql-3");
    assert!(conn.is_idle());
    assert_eq!(names(&pool.list_all()), ["mysql-1", "mysql-3"]);

    // The next anonymous creation skips the live name.
    pool.get("mysql-1").unwrap().set_state(ConnectionState::InUse);
    pool.get("mysql-3").unwrap().set_state(ConnectionState::InUse);
    let grown = pool.acquire(None).await.unwrap();
    assert_eq!(grown.name(), "mysql-2");
}

#[tokio::test]
async fn test_busy_connection_falls_back_to_idle_one() {
    let pool = pool(2, 2).await;
    let busy = pool.get("mysql-1").unwrap();
    busy.set_state(ConnectionState::InUse);

    let output = busy.execute("SELECT 1", &[]).await.unwrap();

    assert_eq!(output.connection, "mysql-2");
    assert_eq!(busy.state(), ConnectionState::InUse);
    assert!(pool.get("mysql-2").unwrap().is_idle());
    assert!(pool.driver().queries_on("mysql-1").is_empty());
    assert_eq!(pool.driver().queries_on("mysql-2"), ["SELECT 1"]);
}

#[tokio::test]
async fn test_fallback_grows_pool_when_nothing_is_idle() {
    let pool = pool(1, 2).await;
    let busy = pool.get("mysql-1").unwrap();
    busy.set_state(ConnectionState::InUse);

    let output = busy.execute("SELECT 1", &[]).await.unwrap();

    assert_eq!(output.connection, "mysql-2");
    assert_eq!(pool.len(), 2);
}

#[tokio::test]
async fn test_fallback_propagates_capacity_error() {
    let pool = pool(1, 1).await;
    let busy = pool.get("mysql-1").unwrap();
    busy.set_state(ConnectionState::InUse);

    let err = busy.execute("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, PoolError::NoConnectionsAvailable { max: 1 }));
    assert_eq!(busy.state(), ConnectionState::InUse);
}

#[tokio::test]
async fn test_second_statement_on_checkout_uses_wrapper() {
    let pool = pool(2, 2).await;

    let conn = pool.acquire(None).await.unwrap();
    assert_eq!(conn.execute("SELECT 1", &[]).await.unwrap().connection, "mysql-1");
    assert!(!conn.holds_claim());

    // Someone else grabbed it in between.
    let other = pool.acquire(None).await.unwrap();
    assert_eq!(other.name(), "mysql-1");

    let output = conn.execute("SELECT 2", &[]).await.unwrap();
    assert_eq!(output.connection, "mysql-2");
    assert_eq!(other.state(), ConnectionState::InUse);
}

#[tokio::test]
async fn test_driver_error_returns_connection_to_pool() {
    let driver = MockDriver::builder()
        .with_response("BROKEN", MockResponse::error(1064, "syntax error"))
        .build();
    let pool = pool_with(1, 1, driver).await;

    let conn = pool.acquire(None).await.unwrap();
    let err = conn.execute("BROKEN", &[]).await.unwrap_err();

    let source = err.driver_error::<sqlpool_testing::MockError>().unwrap();
    assert_eq!(source.to_string(), "query error 1064: syntax error");
    assert!(conn.is_idle());
    assert!(pool.acquire(None).await.is_ok());
}

#[tokio::test]
async fn test_failed_connect_frees_the_name() {
    let driver = MockDriver::builder().with_failing_connect("mysql-2").build();
    let pool = pool_with(1, 3, driver).await;
    pool.get("mysql-1").unwrap().set_state(ConnectionState::InUse);

    let err = pool.acquire(None).await.unwrap_err();
    assert!(matches!(err, PoolError::Driver(_)));
    assert_eq!(pool.len(), 1);

    // The reservation was dropped, so the same name is tried again.
    let err = pool.create_one().await.unwrap_err();
    assert!(matches!(err, PoolError::Driver(_)));
    assert_eq!(pool.status().total, 1);
}

#[tokio::test]
async fn test_initialize_minimum_shrinks_to_min() {
    let pool = pool(2, 4).await;
    pool.create_one().await.unwrap();
    pool.create_one().await.unwrap();
    assert_eq!(pool.len(), 4);

    pool.initialize_minimum().await.unwrap();

    assert_eq!(names(&pool.list_all()), ["mysql-1", "mysql-2"]);
    assert_eq!(pool.list_idle().len(), 2);
    assert_eq!(pool.driver().disconnects(), 4);
    assert_eq!(pool.driver().connects(), 6);
}

#[tokio::test]
async fn test_initialize_minimum_refills_empty_pool() {
    let pool = pool(2, 4).await;
    pool.recycle("mysql-1").await.unwrap();
    pool.recycle("mysql-2").await.unwrap();
    assert!(pool.is_empty());

    pool.initialize_minimum().await.unwrap();

    assert_eq!(names(&pool.list_all()), ["mysql-1", "mysql-2"]);
    assert!(pool.list_all().iter().all(|c| c.is_idle()));
}

#[tokio::test]
async fn test_initialize_minimum_with_zero_min_empties_pool() {
    let pool = pool(1, 2).await;

    let config = pool.config().clone().min_connections(0);
    let empty = Pool::new(config, MockDriver::default()).await.unwrap();
    assert!(empty.is_empty());

    empty.initialize_minimum().await.unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_recycle_removes_exactly_one() {
    let pool = pool(3, 3).await;
    let doomed = pool.get("mysql-2").unwrap();

    pool.recycle("mysql-2").await.unwrap();

    assert_eq!(names(&pool.list_all()), ["mysql-1", "mysql-3"]);
    assert!(doomed.is_recycled());
    assert!(pool.get("mysql-2").is_none());
    assert_eq!(pool.driver().disconnects(), 1);

    let err = doomed.execute("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, PoolError::ConnectionRecycled(ref n) if n == "mysql-2"));
}

#[tokio::test]
async fn test_recycle_unknown_leaves_pool_unchanged() {
    let pool = pool(2, 2).await;

    let err = pool.recycle("mysql-9").await.unwrap_err();

    assert!(matches!(err, PoolError::ConnectionNotFound(ref n) if n == "mysql-9"));
    assert_eq!(names(&pool.list_all()), ["mysql-1", "mysql-2"]);
    assert_eq!(pool.driver().disconnects(), 0);
}

#[tokio::test]
async fn test_recycled_name_can_be_reopened() {
    let pool = pool(2, 2).await;
    pool.recycle("mysql-1").await.unwrap();

    let created = pool.create_one().await.unwrap();
    assert_eq!(created.name(), "mysql-1");
    assert_eq!(names(&pool.list_all()), ["mysql-2", "mysql-1"]);
}

#[tokio::test]
async fn test_labels_round_trip() {
    let pool = pool(2, 2).await;
    let conn = pool.get("mysql-1").unwrap();

    conn.add_label("a");
    assert_eq!(conn.labels(), ["a"]);

    conn.add_label("replica").add_label("a");
    assert_eq!(conn.labels(), ["a", "replica", "a"]);

    conn.remove_label("a");
    assert_eq!(conn.labels(), ["replica"]);

    conn.remove_label("absent");
    assert_eq!(conn.labels(), ["replica"]);
}

#[tokio::test]
async fn test_labels_do_not_affect_allocation() {
    let pool = pool(2, 2).await;
    pool.get("mysql-2").unwrap().add_label("replica");

    let conn = pool.acquire(None).await.unwrap();
    assert_eq!(conn.name(), "mysql-1");

    assert!(pool.idle_with_label("replica").iter().all(|c| c.name() == "mysql-2"));
    conn.release();
    assert_eq!(names(&pool.idle_with_label("replica")), ["mysql-2"]);
}

#[tokio::test]
async fn test_list_idle_is_idempotent() {
    let pool = pool(3, 3).await;
    let _busy = pool.acquire(None).await.unwrap();

    let first = names(&pool.list_idle());
    let second = names(&pool.list_idle());

    assert_eq!(first, ["mysql-2", "mysql-3"]);
    assert_eq!(first, second);
    assert_eq!(pool.len(), 3);
}

#[tokio::test]
async fn test_status_tracks_checkouts() {
    let pool = pool(2, 3).await;
    let _held = pool.acquire(None).await.unwrap();

    let status = pool.status();
    assert_eq!(status.available, 1);
    assert_eq!(status.in_use, 1);
    assert_eq!(status.total, 2);
    assert_eq!(status.max, 3);
}

#[tokio::test]
async fn test_metadata_counts_checkouts() {
    let pool = pool(1, 1).await;

    for _ in 0..3 {
        pool.acquire(None)
            .await
            .unwrap()
            .execute("SELECT 1", &[])
            .await
            .unwrap();
    }

    let metadata = pool.get("mysql-1").unwrap().metadata();
    assert_eq!(metadata.checkout_count, 3);
    assert!(metadata.last_used_at >= metadata.created_at);
}

#[tokio::test]
async fn test_close_disconnects_everything() {
    let pool = pool(2, 4).await;
    let conn = pool.get("mysql-1").unwrap();

    pool.close().await;

    assert!(pool.is_closed());
    assert!(pool.is_empty());
    assert!(conn.is_recycled());
    assert_eq!(pool.driver().disconnects(), 2);
    assert!(matches!(
        pool.create_one().await.unwrap_err(),
        PoolError::PoolClosed
    ));
}
