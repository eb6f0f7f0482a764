//! Write protocol for callers that keep a connection bound between
//! statements.
//!
//! A persistence layer typically remembers "its" connection on a long-lived
//! object and reuses it later. By the time a write happens that connection
//! may be marked `InUse` by someone else, or by this very caller, and the
//! execution wrapper would then detour. [`BoundConnection::save`] avoids
//! this: it releases the bound connection, acquires a fresh idle one,
//! rebinds to it and performs the write there.

use std::sync::Arc;

use crate::connection::PooledConnection;
use crate::driver::{Driver, Value};
use crate::error::Result;
use crate::lifecycle::ConnectionState;
use crate::pool::Pool;

/// A pool connection remembered by a caller across statements.
pub struct BoundConnection<D: Driver> {
    pool: Pool<D>,
    conn: Arc<PooledConnection<D>>,
}

impl<D: Driver> BoundConnection<D> {
    /// Bind to an existing pooled connection.
    pub fn new(pool: Pool<D>, conn: Arc<PooledConnection<D>>) -> Self {
        Self { pool, conn }
    }

    /// Bind to the named connection, opening it if needed.
    ///
    /// # Errors
    ///
    /// Any error from a named [`Pool::acquire`].
    pub async fn named(pool: Pool<D>, name: &str) -> Result<Self> {
        let conn = Arc::clone(pool.acquire(Some(name)).await?.connection());
        Ok(Self { pool, conn })
    }

    /// Name of the currently bound connection.
    #[must_use]
    pub fn name(&self) -> &str {
        self.conn.name()
    }

    /// The currently bound connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<PooledConnection<D>> {
        &self.conn
    }

    /// Run a statement through the bound connection's execution wrapper.
    ///
    /// # Errors
    ///
    /// See [`PooledConnection::execute`].
    pub async fn execute(&self, query: &str, bindings: &[Value]) -> Result<D::Output> {
        self.conn.execute(query, bindings).await
    }

    /// Perform a write on a freshly acquired connection.
    ///
    /// The bound connection is marked `NotInUse` first, then an idle
    /// connection is acquired anonymously and becomes the new binding. The
    /// write runs on it and leaves it `NotInUse` whether it succeeds or
    /// fails.
    ///
    /// # Errors
    ///
    /// Acquisition errors (the binding is left unchanged) or the write's
    /// own error (the binding has already moved).
    pub async fn save(&mut self, query: &str, bindings: &[Value]) -> Result<D::Output> {
        self.conn.set_state(ConnectionState::NotInUse);

        let checkout = self.pool.acquire(None).await?;
        if checkout.name() != self.conn.name() {
            tracing::debug!(
                from = %self.conn.name(),
                to = %checkout.name(),
                "rebinding for write"
            );
        }
        self.conn = Arc::clone(checkout.connection());

        checkout.execute(query, bindings).await
    }
}

impl<D: Driver> std::fmt::Debug for BoundConnection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundConnection")
            .field("connection", &self.conn)
            .finish_non_exhaustive()
    }
}
