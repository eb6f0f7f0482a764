//! Pooled connection: busy/idle state machine, labels and the execution
//! wrapper with contention fallback.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::driver::{Driver, Value};
use crate::error::{PoolError, Result};
use crate::lifecycle::{AtomicState, Claim, ConnectionMetadata, ConnectionState, ReleaseOnDrop};
use crate::pool::{Pool, PoolInner};

/// One native connection handle plus the bookkeeping the pool needs.
///
/// A `PooledConnection` is shared as `Arc<PooledConnection<D>>`. Holding a
/// reference grants nothing: the handle is only touched by whoever moved the
/// state from [`ConnectionState::NotInUse`] to [`ConnectionState::InUse`].
pub struct PooledConnection<D: Driver> {
    name: Arc<str>,
    driver: Arc<D>,
    handle: tokio::sync::Mutex<Option<D::Handle>>,
    state: AtomicState,
    labels: Mutex<Vec<String>>,
    metadata: Mutex<ConnectionMetadata>,
    pool: Option<Weak<PoolInner<D>>>,
    recycled: CancellationToken,
}

impl<D: Driver> PooledConnection<D> {
    pub(crate) fn managed(
        name: Arc<str>,
        handle: D::Handle,
        driver: Arc<D>,
        pool: Weak<PoolInner<D>>,
    ) -> Self {
        Self::build(name, handle, driver, Some(pool))
    }

    /// Wrap a handle that no pool owns.
    ///
    /// A detached connection runs statements like any other, but when it is
    /// found busy there is nothing to borrow from and
    /// [`execute`](Self::execute) fails with [`PoolError::ConnectionInUse`].
    pub fn detached(name: impl Into<Arc<str>>, handle: D::Handle, driver: Arc<D>) -> Self {
        Self::build(name.into(), handle, driver, None)
    }

    fn build(
        name: Arc<str>,
        handle: D::Handle,
        driver: Arc<D>,
        pool: Option<Weak<PoolInner<D>>>,
    ) -> Self {
        Self {
            name,
            driver,
            handle: tokio::sync::Mutex::new(Some(handle)),
            state: AtomicState::default(),
            labels: Mutex::new(Vec::new()),
            metadata: Mutex::new(ConnectionMetadata::new()),
            pool,
            recycled: CancellationToken::new(),
        }
    }

    /// Name of this connection, unique within its pool.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current busy/idle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Check if the connection is idle.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state().is_available()
    }

    /// Overwrite the state without any check.
    ///
    /// This is the manual escape hatch used by collaborators that release a
    /// connection ahead of time (see [`BoundConnection`]). Marking a
    /// connection `NotInUse` while an operation is still running on it lets
    /// the next acquirer in; the handle itself stays serialized.
    ///
    /// [`BoundConnection`]: crate::session::BoundConnection
    pub fn set_state(&self, state: ConnectionState) -> &Self {
        self.state.store(state);
        self
    }

    /// Check if the connection belongs to a pool that is still alive.
    #[must_use]
    pub fn is_managed(&self) -> bool {
        self.pool.as_ref().is_some_and(|pool| pool.strong_count() > 0)
    }

    /// Check if the connection has been recycled out of its pool.
    #[must_use]
    pub fn is_recycled(&self) -> bool {
        self.recycled.is_cancelled()
    }

    /// Snapshot of the connection's usage metadata.
    #[must_use]
    pub fn metadata(&self) -> ConnectionMetadata {
        self.metadata.lock().clone()
    }

    /// Current labels, in insertion order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().clone()
    }

    /// Append a label. Duplicates are kept.
    pub fn add_label(&self, label: impl Into<String>) -> &Self {
        self.labels.lock().push(label.into());
        self
    }

    /// Remove every occurrence of a label.
    pub fn remove_label(&self, label: &str) -> &Self {
        self.labels.lock().retain(|l| l != label);
        self
    }

    /// Check if the connection carries a label.
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.lock().iter().any(|l| l == label)
    }

    /// Run a statement on this connection, or on a borrowed one if this
    /// connection is busy.
    ///
    /// When the connection is idle it is marked `InUse` for the duration of
    /// the driver call and returned to `NotInUse` afterwards, whether the
    /// call succeeds, fails or is dropped.
    ///
    /// When it is already `InUse` the statement is never sent on this
    /// handle. Instead an idle connection is acquired from the owning pool,
    /// the statement runs there, and that connection is released. The state
    /// of this connection is left untouched.
    ///
    /// # Errors
    ///
    /// - [`PoolError::ConnectionInUse`] if busy and not owned by a live pool.
    /// - Any acquisition error from the pool during fallback.
    /// - [`PoolError::ConnectionRecycled`] if the connection was recycled.
    /// - [`PoolError::Driver`] for errors raised by the driver.
    pub async fn execute(&self, query: &str, bindings: &[Value]) -> Result<D::Output> {
        if self.is_recycled() {
            return Err(PoolError::ConnectionRecycled(self.name.to_string()));
        }

        if let Some(claim) = self.claim() {
            return self.run_claimed(claim, query, bindings).await;
        }

        let Some(inner) = self.pool.as_ref().and_then(Weak::upgrade) else {
            tracing::warn!(connection = %self.name, "connection in use and has no pool to borrow from");
            return Err(PoolError::ConnectionInUse(self.name.to_string()));
        };

        let borrowed = Pool::from_inner(inner).acquire(None).await?;
        tracing::debug!(
            busy = %self.name,
            borrowed = %borrowed.name(),
            "connection in use, running on borrowed connection"
        );
        match borrowed.consume_claim() {
            Some(claim) => borrowed.connection().run_claimed(claim, query, bindings).await,
            None => Box::pin(borrowed.connection().execute(query, bindings)).await,
        }
    }

    /// Move `NotInUse -> InUse`, recording the checkout.
    pub(crate) fn claim(&self) -> Option<Claim> {
        let claim = self.state.try_claim()?;
        self.metadata.lock().mark_checkout();
        Some(claim)
    }

    /// Give back a claim taken with [`claim`](Self::claim).
    ///
    /// Has no effect if the state was overwritten or re-claimed since.
    pub(crate) fn release(&self, claim: Claim) {
        self.state.release(claim);
    }

    /// Run a statement while holding the `InUse` claim, then release it.
    ///
    /// Only that claim is released: if the state was reset by hand and
    /// someone else claimed the connection meanwhile, their claim stands.
    pub(crate) async fn run_claimed(
        &self,
        claim: Claim,
        query: &str,
        bindings: &[Value],
    ) -> Result<D::Output> {
        let _release = ReleaseOnDrop {
            state: &self.state,
            claim,
        };

        let mut guard = self.handle.lock().await;
        let Some(handle) = guard.as_mut() else {
            return Err(PoolError::ConnectionRecycled(self.name.to_string()));
        };

        tracing::trace!(connection = %self.name, query, "executing statement");

        let result = tokio::select! {
            biased;
            () = self.recycled.cancelled() => {
                Err(PoolError::ConnectionRecycled(self.name.to_string()))
            }
            result = self.driver.execute(handle, query, bindings) => {
                result.map_err(PoolError::driver)
            }
        };

        drop(guard);
        self.metadata.lock().mark_checkin();
        result
    }

    /// Abort any in-flight statement and take the handle out for closing.
    pub(crate) async fn retire(&self) -> Option<D::Handle> {
        self.recycled.cancel();
        self.handle.lock().await.take()
    }
}

impl<D: Driver> std::fmt::Debug for PooledConnection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("labels", &*self.labels.lock())
            .field("recycled", &self.is_recycled())
            .finish_non_exhaustive()
    }
}
