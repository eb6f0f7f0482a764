//! # sqlpool
//!
//! Fail-fast pool of named database connections with per-connection
//! busy/idle tracking and contention fallback.
//!
//! Every pooled connection carries a [`ConnectionState`]. Anonymous
//! acquisition hands out the first `NotInUse` connection, grows the pool up
//! to `max_connections`, and otherwise fails immediately with
//! [`PoolError::NoConnectionsAvailable`]. There is no wait queue.
//!
//! A statement run through [`PooledConnection::execute`] on a connection that
//! is already `InUse` is never sent on that handle. It is redirected to an
//! idle connection borrowed from the same pool.
//!
//! ## Features
//!
//! - Configurable min/max pool sizes over an ordered set of named templates
//! - Non-blocking acquisition with explicit admission control
//! - Named acquisition for pinned sessions
//! - Free-form connection labels for caller-side affinity
//! - Administrative recycle and refill
//! - Driver-agnostic: anything implementing [`Driver`] can be pooled
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpool::{ConnectionSettings, Pool};
//!
//! let pool = Pool::builder()
//!     .min_connections(2)
//!     .max_connections(4)
//!     .numbered_connections("mysql", 4, ConnectionSettings::new().database("app"))
//!     .build(driver)
//!     .await?;
//!
//! let conn = pool.acquire(None).await?;
//! let rows = conn.execute("SELECT * FROM users WHERE id = ?", &[1.into()]).await?;
//! // `conn` is back to NotInUse once the statement completes
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod session;

#[cfg(test)]
mod test_support;

pub use config::{ConnectionSettings, PoolConfig};
pub use connection::PooledConnection;
pub use driver::{Driver, Value};
pub use error::{PoolError, Result};
pub use lifecycle::{ConnectionMetadata, ConnectionState};
pub use pool::{Checkout, Pool, PoolBuilder, PoolStatus};
pub use session::BoundConnection;
