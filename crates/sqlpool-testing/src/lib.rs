//! # sqlpool-testing
//!
//! Test infrastructure for sqlpool.
//!
//! This crate provides a scripted in-memory [`Driver`](sqlpool::Driver) and
//! configuration fixtures, so pool behavior can be exercised without a
//! database server.
//!
//! ## Features
//!
//! - Mock driver with per-query responses and latency
//! - `SLEEP(n)` queries for contention and timing tests
//! - Statement recording with the connection each one ran on
//! - Connect/disconnect counters and peak concurrency
//! - Pool configuration fixtures, optionally read from the environment
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpool::Pool;
//! use sqlpool_testing::{MockDriver, MockResponse, TestFixture};
//!
//! #[tokio::test]
//! async fn test_with_mock_driver() {
//!     let driver = MockDriver::builder()
//!         .with_response("SELECT 1", MockResponse::scalar(1))
//!         .build();
//!
//!     let pool = Pool::new(TestFixture::new(2, 4).config(), driver).await.unwrap();
//!     let conn = pool.acquire(None).await.unwrap();
//!     let output = conn.execute("SELECT 1", &[]).await.unwrap();
//!     assert_eq!(output.connection, "mysql-1");
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_driver;

pub use fixtures::TestFixture;
pub use mock_driver::{
    MockDriver, MockDriverBuilder, MockError, MockHandle, MockOutput, MockResponse, RecordedQuery,
};
