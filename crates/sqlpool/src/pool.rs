//! Connection pool implementation.
//!
//! Acquisition never waits. An anonymous request takes the first idle
//! connection in insertion order, otherwise materializes the next unused
//! template if the pool is below `max_connections`, otherwise fails with
//! [`PoolError::NoConnectionsAvailable`]. Callers that want to retry must
//! do so themselves.
//!
//! The connection map sits behind a `parking_lot::Mutex` that is never held
//! across an `.await`. Creating a connection first reserves its name under
//! the lock, then connects, then publishes the connection, so the pool
//! never exceeds its maximum even while connects are in flight.

use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::config::{ConnectionSettings, PoolConfig};
use crate::connection::PooledConnection;
use crate::driver::{Driver, Value};
use crate::error::{PoolError, Result};
use crate::lifecycle::{Claim, ConnectionState};

/// A bounded pool of named database connections.
///
/// `Pool` is a cheap handle; clones share the same connections.
pub struct Pool<D: Driver> {
    inner: Arc<PoolInner<D>>,
}

pub(crate) struct PoolInner<D: Driver> {
    config: PoolConfig,
    driver: Arc<D>,
    slots: Mutex<Slots<D>>,
    closed: AtomicBool,
}

struct Slots<D: Driver> {
    connections: IndexMap<Arc<str>, Arc<PooledConnection<D>>>,
    /// Names whose connect is in flight.
    pending: Vec<Arc<str>>,
}

impl<D: Driver> Slots<D> {
    fn occupied(&self) -> usize {
        self.connections.len() + self.pending.len()
    }

    fn is_taken(&self, name: &str) -> bool {
        self.connections.contains_key(name) || self.pending.iter().any(|p| &**p == name)
    }
}

impl<D: Driver> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> Pool<D> {
    /// Create a pool and open `min_connections` connections.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or a connect fails.
    pub async fn new(config: PoolConfig, driver: D) -> Result<Self> {
        config.validate()?;

        let pool = Self {
            inner: Arc::new(PoolInner {
                config,
                driver: Arc::new(driver),
                slots: Mutex::new(Slots {
                    connections: IndexMap::new(),
                    pending: Vec::new(),
                }),
                closed: AtomicBool::new(false),
            }),
        };

        pool.initialize_minimum().await?;
        tracing::info!(
            min = pool.inner.config.min_connections,
            max = pool.inner.config.max_connections,
            "connection pool started"
        );
        Ok(pool)
    }

    /// Start building a pool.
    #[must_use]
    pub fn builder() -> PoolBuilder<D> {
        PoolBuilder::new()
    }

    pub(crate) fn from_inner(inner: Arc<PoolInner<D>>) -> Self {
        Self { inner }
    }

    /// Get a connection from the pool.
    ///
    /// With `name == None` this returns a [`Checkout`] holding the `InUse`
    /// claim on the first idle connection, creating a new connection if
    /// none is idle and the pool has room.
    ///
    /// With a name, the connection of that name is returned, created first
    /// if it is configured but not yet open. Its busy/idle state is neither
    /// checked nor changed, so two callers naming the same connection get
    /// the same handle. Use this for deliberately pinned sessions only.
    ///
    /// # Errors
    ///
    /// - [`PoolError::NoConnectionsAvailable`] if nothing is idle and the
    ///   pool cannot grow.
    /// - [`PoolError::UnknownConnection`], [`PoolError::ConnectionPending`]
    ///   or [`PoolError::PoolFull`] for named lookups.
    /// - [`PoolError::PoolClosed`] after [`close`](Self::close).
    /// - [`PoolError::Driver`] if a new connection fails to connect.
    pub async fn acquire(&self, name: Option<&str>) -> Result<Checkout<D>> {
        self.ensure_open()?;

        match name {
            Some(name) => self.acquire_named(name).await,
            None => self.acquire_idle().await,
        }
    }

    async fn acquire_idle(&self) -> Result<Checkout<D>> {
        let max = self.inner.config.max_connections;

        let name = {
            let mut slots = self.inner.slots.lock();

            let idle = slots
                .connections
                .values()
                .find_map(|conn| conn.claim().map(|claim| (conn, claim)));
            if let Some((conn, claim)) = idle {
                tracing::trace!(connection = %conn.name(), "acquired idle connection");
                return Ok(Checkout::claimed(Arc::clone(conn), claim));
            }

            match self.reserve_next(&mut slots) {
                Ok(name) => name,
                Err(_) => {
                    tracing::debug!(max, "no idle connections available");
                    return Err(PoolError::NoConnectionsAvailable { max });
                }
            }
        };

        let (conn, claim) = self.materialize(name, true).await?;
        Ok(match claim {
            Some(claim) => Checkout::claimed(conn, claim),
            None => Checkout::unclaimed(conn),
        })
    }

    async fn acquire_named(&self, name: &str) -> Result<Checkout<D>> {
        let max = self.inner.config.max_connections;

        let reserved = {
            let mut slots = self.inner.slots.lock();

            if let Some(conn) = slots.connections.get(name) {
                tracing::trace!(connection = %name, "acquired connection by name");
                return Ok(Checkout::unclaimed(Arc::clone(conn)));
            }
            let Some((template, _)) = self.inner.config.connections.get_key_value(name) else {
                return Err(PoolError::UnknownConnection(name.to_owned()));
            };
            if slots.is_taken(name) {
                return Err(PoolError::ConnectionPending(name.to_owned()));
            }
            if slots.occupied() >= max as usize {
                return Err(PoolError::PoolFull { max });
            }

            let reserved: Arc<str> = Arc::from(template.as_str());
            slots.pending.push(Arc::clone(&reserved));
            reserved
        };

        let (conn, _) = self.materialize(reserved, false).await?;
        Ok(Checkout::unclaimed(conn))
    }

    /// Add one connection from the first template not yet in the pool.
    ///
    /// # Errors
    ///
    /// - [`PoolError::PoolFull`] if the pool is at `max_connections`.
    /// - [`PoolError::TemplatesExhausted`] if every template is live.
    /// - [`PoolError::Driver`] if the connect fails.
    pub async fn create_one(&self) -> Result<Arc<PooledConnection<D>>> {
        self.ensure_open()?;

        let name = {
            let mut slots = self.inner.slots.lock();
            self.reserve_next(&mut slots)?
        };
        let (conn, _) = self.materialize(name, false).await?;
        Ok(conn)
    }

    /// Recycle every connection, then open `min_connections` fresh ones.
    ///
    /// # Errors
    ///
    /// Fails if the pool is closed or a connect fails; connections opened
    /// before the failure stay in the pool.
    pub async fn initialize_minimum(&self) -> Result<()> {
        self.ensure_open()?;
        self.recycle_all().await;

        // Connects in flight count toward the minimum, so concurrent refills
        // never open more than `min_connections` between them.
        let min = self.inner.config.min_connections as usize;
        loop {
            let name = {
                let mut slots = self.inner.slots.lock();
                if slots.occupied() >= min {
                    break;
                }
                self.reserve_next(&mut slots)?
            };
            self.materialize(name, false).await?;
        }

        tracing::info!(total = self.len(), "connection pool filled to minimum");
        Ok(())
    }

    /// Disconnect and remove the named connection.
    ///
    /// The connection's state is not consulted. A statement still running
    /// on it is aborted and fails with [`PoolError::ConnectionRecycled`].
    ///
    /// # Errors
    ///
    /// [`PoolError::ConnectionNotFound`] if no connection has this name; the
    /// pool is left unchanged.
    pub async fn recycle(&self, name: &str) -> Result<()> {
        let conn = self
            .inner
            .slots
            .lock()
            .connections
            .shift_remove(name)
            .ok_or_else(|| PoolError::ConnectionNotFound(name.to_owned()))?;

        self.disconnect(conn).await;
        Ok(())
    }

    async fn recycle_all(&self) {
        let drained: Vec<_> = {
            let mut slots = self.inner.slots.lock();
            slots.connections.drain(..).map(|(_, conn)| conn).collect()
        };

        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "recycling all connections");
        }
        for conn in drained {
            self.disconnect(conn).await;
        }
    }

    /// Close the pool, recycling every connection.
    ///
    /// Later acquisitions fail with [`PoolError::PoolClosed`].
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.recycle_all().await;
        tracing::info!("connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Look up a live connection by name without creating it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<PooledConnection<D>>> {
        self.inner.slots.lock().connections.get(name).cloned()
    }

    /// Snapshot of idle connections, in insertion order.
    #[must_use]
    pub fn list_idle(&self) -> Vec<Arc<PooledConnection<D>>> {
        self.inner
            .slots
            .lock()
            .connections
            .values()
            .filter(|conn| conn.is_idle())
            .cloned()
            .collect()
    }

    /// Snapshot of every connection, in insertion order.
    #[must_use]
    pub fn list_all(&self) -> Vec<Arc<PooledConnection<D>>> {
        self.inner
            .slots
            .lock()
            .connections
            .values()
            .cloned()
            .collect()
    }

    /// Idle connections carrying `label`, in insertion order.
    ///
    /// Labels never influence [`acquire`](Self::acquire); this is for
    /// callers that keep their own affinity rules.
    #[must_use]
    pub fn idle_with_label(&self, label: &str) -> Vec<Arc<PooledConnection<D>>> {
        self.list_idle()
            .into_iter()
            .filter(|conn| conn.has_label(label))
            .collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.slots.lock().connections.len()
    }

    /// Check if the pool holds no connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let slots = self.inner.slots.lock();
        let total = slots.connections.len() as u32;
        let available = slots.connections.values().filter(|c| c.is_idle()).count() as u32;

        PoolStatus {
            available,
            in_use: total - available,
            total,
            max: self.inner.config.max_connections,
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the driver the pool connects with.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        Ok(())
    }

    /// Reserve the first template name that is neither live nor pending.
    fn reserve_next(&self, slots: &mut Slots<D>) -> Result<Arc<str>> {
        let max = self.inner.config.max_connections;
        if slots.occupied() >= max as usize {
            return Err(PoolError::PoolFull { max });
        }

        let name = self
            .inner
            .config
            .connections
            .keys()
            .find(|name| !slots.is_taken(name))
            .ok_or(PoolError::TemplatesExhausted)?;

        let name: Arc<str> = Arc::from(name.as_str());
        slots.pending.push(Arc::clone(&name));
        Ok(name)
    }

    /// Connect a reserved name and publish it in the pool.
    ///
    /// With `claimed`, the connection is marked `InUse` before anyone else
    /// can see it and the claim is returned alongside.
    async fn materialize(
        &self,
        name: Arc<str>,
        claimed: bool,
    ) -> Result<(Arc<PooledConnection<D>>, Option<Claim>)> {
        let reservation = Reservation {
            inner: &self.inner,
            name: Arc::clone(&name),
        };

        let settings: &ConnectionSettings = self
            .inner
            .config
            .settings(&name)
            .ok_or_else(|| PoolError::UnknownConnection(name.to_string()))?;

        tracing::debug!(connection = %name, host = %settings.host, "opening connection");
        let handle = self
            .inner
            .driver
            .connect(&name, settings)
            .await
            .map_err(PoolError::driver)?;

        if let Some(reported) = self.inner.driver.resolve_name(&handle) {
            if *reported != *name {
                tracing::warn!(
                    connection = %name,
                    reported = %reported,
                    "driver reports a different connection name"
                );
            }
        }

        let conn = Arc::new(PooledConnection::managed(
            Arc::clone(&name),
            handle,
            Arc::clone(&self.inner.driver),
            Arc::downgrade(&self.inner),
        ));
        let claim = if claimed { conn.claim() } else { None };

        let published = {
            let mut slots = self.inner.slots.lock();
            if self.is_closed() {
                false
            } else {
                slots.connections.insert(Arc::clone(&name), Arc::clone(&conn));
                reservation.release(&mut slots);
                true
            }
        };

        if !published {
            drop(reservation);
            self.disconnect(conn).await;
            return Err(PoolError::PoolClosed);
        }

        tracing::debug!(connection = %name, total = self.len(), "connection added to pool");
        Ok((conn, claim))
    }

    async fn disconnect(&self, conn: Arc<PooledConnection<D>>) {
        if conn.state() == ConnectionState::InUse {
            tracing::warn!(connection = %conn.name(), "recycling a connection that is in use");
        }

        if let Some(handle) = conn.retire().await {
            if let Err(e) = self.inner.driver.disconnect(handle).await {
                tracing::warn!(connection = %conn.name(), error = %e, "disconnect failed");
            }
        }
        tracing::debug!(connection = %conn.name(), "connection recycled");
    }
}

impl<D: Driver> std::fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Pending-name reservation, dropped if the connect fails or is cancelled.
struct Reservation<'a, D: Driver> {
    inner: &'a PoolInner<D>,
    name: Arc<str>,
}

impl<D: Driver> Reservation<'_, D> {
    fn release(&self, slots: &mut Slots<D>) {
        slots.pending.retain(|p| !Arc::ptr_eq(p, &self.name));
    }
}

impl<D: Driver> Drop for Reservation<'_, D> {
    fn drop(&mut self) {
        let mut slots = self.inner.slots.lock();
        self.release(&mut slots);
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Total number of connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

/// A connection handed out by [`Pool::acquire`].
///
/// An anonymous checkout owns the `InUse` claim made by the pool. The first
/// [`execute`](Self::execute) spends that claim and runs directly on the
/// connection, which is `NotInUse` again once it finishes. Any further
/// statement goes through [`PooledConnection::execute`] and so may be
/// redirected if the connection has since been taken by someone else.
///
/// Dropping a checkout whose claim was never spent releases the connection.
pub struct Checkout<D: Driver> {
    conn: Arc<PooledConnection<D>>,
    claim: Mutex<Option<Claim>>,
}

impl<D: Driver> Checkout<D> {
    fn claimed(conn: Arc<PooledConnection<D>>, claim: Claim) -> Self {
        Self {
            conn,
            claim: Mutex::new(Some(claim)),
        }
    }

    fn unclaimed(conn: Arc<PooledConnection<D>>) -> Self {
        Self {
            conn,
            claim: Mutex::new(None),
        }
    }

    /// Check if this checkout still owns the acquisition claim.
    #[must_use]
    pub fn holds_claim(&self) -> bool {
        self.claim.lock().is_some()
    }

    /// The underlying shared connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<PooledConnection<D>> {
        &self.conn
    }

    /// Give up the checkout but keep the connection marked `InUse`.
    ///
    /// The caller becomes responsible for releasing it with
    /// [`PooledConnection::set_state`].
    #[must_use]
    pub fn into_connection(self) -> Arc<PooledConnection<D>> {
        self.claim.lock().take();
        Arc::clone(&self.conn)
    }

    /// Run a statement, spending the claim if it is still held.
    ///
    /// # Errors
    ///
    /// See [`PooledConnection::execute`].
    pub async fn execute(&self, query: &str, bindings: &[Value]) -> Result<D::Output> {
        match self.consume_claim() {
            Some(claim) => self.conn.run_claimed(claim, query, bindings).await,
            None => self.conn.execute(query, bindings).await,
        }
    }

    /// Return the connection to the pool without running anything.
    pub fn release(self) {}

    pub(crate) fn consume_claim(&self) -> Option<Claim> {
        self.claim.lock().take()
    }
}

impl<D: Driver> Deref for Checkout<D> {
    type Target = PooledConnection<D>;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<D: Driver> Drop for Checkout<D> {
    fn drop(&mut self) {
        if let Some(claim) = self.consume_claim() {
            tracing::trace!(connection = %self.conn.name(), "returning unused connection to pool");
            self.conn.release(claim);
        }
    }
}

impl<D: Driver> std::fmt::Debug for Checkout<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkout")
            .field("connection", &self.conn)
            .field("holds_claim", &self.holds_claim())
            .finish()
    }
}

/// Builder for [`Pool`].
///
/// The driver type is fixed up front so [`Pool::builder`] can infer it from
/// the later [`build`](Self::build) call.
pub struct PoolBuilder<D: Driver> {
    config: PoolConfig,
    _driver: PhantomData<fn() -> D>,
}

impl<D: Driver> PoolBuilder<D> {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            _driver: PhantomData,
        }
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.config = self.config.min_connections(count);
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.config = self.config.max_connections(count);
        self
    }

    /// Declare a named connection template.
    #[must_use]
    pub fn connection(mut self, name: impl Into<String>, settings: ConnectionSettings) -> Self {
        self.config = self.config.connection(name, settings);
        self
    }

    /// Declare `<base>-1 .. <base>-<count>` connection templates.
    #[must_use]
    pub fn numbered_connections(
        mut self,
        base: &str,
        count: u32,
        settings: ConnectionSettings,
    ) -> Self {
        self.config = self.config.numbered_connections(base, count, settings);
        self
    }

    /// Build the pool, opening `min_connections` connections.
    ///
    /// # Errors
    ///
    /// See [`Pool::new`].
    pub async fn build(self, driver: D) -> Result<Pool<D>> {
        Pool::new(self.config, driver).await
    }
}

impl<D: Driver> Default for PoolBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Driver> Clone for PoolBuilder<D> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            _driver: PhantomData,
        }
    }
}

impl<D: Driver> std::fmt::Debug for PoolBuilder<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("config", &self.config)
            .finish()
    }
}
