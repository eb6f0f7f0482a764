//! Connection pool walkthrough against the mock driver.
//!
//! This example shows fail-fast acquisition, contention fallback,
//! labels and the save protocol without a database server.
//!
//! # Running
//!
//! ```bash
//! # Optional: the settings are only logged, never dialed
//! export DB_HOST=db.internal
//! export DB_DATABASE=app
//!
//! RUST_LOG=debug cargo run -p sqlpool-testing --example connection_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use sqlpool::{BoundConnection, ConnectionState, Pool, PoolError};
use sqlpool_testing::{MockDriver, MockResponse, TestFixture};

#[tokio::main]
async fn main() -> Result<(), PoolError> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    let driver = MockDriver::builder()
        .with_response("SELECT COUNT(*) FROM users", MockResponse::scalar(42))
        .with_response("UPDATE users SET active = 1", MockResponse::affected(3))
        .build();

    let fixture = TestFixture::from_env(2, 4);
    println!(
        "Opening pool for {}:{} (min 2, max 4)...",
        fixture.settings.host, fixture.settings.port
    );
    let pool = Pool::new(fixture.config(), driver).await?;
    println!("Pool status: {:?}", pool.status());

    // Anonymous acquisition hands out the first idle connection
    let conn = pool.acquire(None).await?;
    let output = conn.execute("SELECT COUNT(*) FROM users", &[]).await?;
    println!("{} returned {:?}", output.connection, output.rows);

    // Hold every slot to see the pool fail fast
    let mut held = Vec::new();
    loop {
        match pool.acquire(None).await {
            Ok(conn) => held.push(conn),
            Err(e) if e.is_capacity() => {
                println!("Pool exhausted after {} checkouts: {}", held.len(), e);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    held.pop();

    // A busy connection redirects statements to an idle one
    let busy = pool.get("mysql-1").expect("mysql-1 is open");
    busy.set_state(ConnectionState::InUse);
    let output = busy.execute("SELECT 1", &[]).await?;
    println!("mysql-1 is busy, statement ran on {}", output.connection);
    busy.set_state(ConnectionState::NotInUse);
    drop(held);

    // Labels are caller-side bookkeeping only
    pool.get("mysql-2")
        .expect("mysql-2 is open")
        .add_label("replica");
    for conn in pool.idle_with_label("replica") {
        println!("{} carries labels {:?}", conn.name(), conn.labels());
    }

    // Writes through a remembered connection rebind to an idle one
    let mut bound = BoundConnection::named(pool.clone(), "mysql-1").await?;
    bound.connection().set_state(ConnectionState::InUse);
    let output = bound.save("UPDATE users SET active = 1", &[]).await?;
    println!(
        "Saved on {} ({} rows affected)",
        bound.name(),
        output.rows_affected
    );

    pool.recycle("mysql-4").await?;
    pool.initialize_minimum().await?;
    println!("Pool status after refill: {:?}", pool.status());

    pool.close().await;
    println!(
        "Closed. Connects: {}, disconnects: {}",
        pool.driver().connects(),
        pool.driver().disconnects()
    );

    Ok(())
}
