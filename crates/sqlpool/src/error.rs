//! Pool error types.

use thiserror::Error;

/// Boxed error produced by a [`Driver`](crate::Driver) implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Anonymous acquisition found no idle connection and the pool is at
    /// its maximum size.
    #[error("there are no idle connections available (max {max})")]
    NoConnectionsAvailable {
        /// Maximum allowed connections.
        max: u32,
    },

    /// Explicit creation was requested while the pool is at its maximum size.
    #[error("cannot make a new connection: connection pool is full (max {max})")]
    PoolFull {
        /// Maximum allowed connections.
        max: u32,
    },

    /// No connection with this name is currently in the pool.
    #[error("connection [{0}] not found in the pool")]
    ConnectionNotFound(String),

    /// The connection is busy and has no owning pool to borrow from.
    #[error("connection [{0}] is in use and is not managed by a pool")]
    ConnectionInUse(String),

    /// A connection name was requested that no template declares.
    #[error("connection [{0}] is not configured")]
    UnknownConnection(String),

    /// Every configured template already backs a live connection.
    #[error("every configured connection template is already in use")]
    TemplatesExhausted,

    /// The named connection is still being established by another caller.
    #[error("connection [{0}] is still being established")]
    ConnectionPending(String),

    /// The connection was recycled before or while the operation ran.
    #[error("connection [{0}] has been recycled")]
    ConnectionRecycled(String),

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// Error reported by the driver, passed through untouched.
    #[error(transparent)]
    Driver(BoxError),
}

impl PoolError {
    /// Wrap a driver error.
    pub fn driver<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Driver(Box::new(err))
    }

    /// Borrow the driver error as its concrete type, if this is one.
    #[must_use]
    pub fn driver_error<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Driver(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Check if this error is a fail-fast admission rejection.
    ///
    /// The pool never queues or retries; callers that want backoff should
    /// retry on these.
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            Self::NoConnectionsAvailable { .. }
                | Self::PoolFull { .. }
                | Self::ConnectionPending(_)
        )
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("duplicate key")]
    struct DuplicateKey;

    #[test]
    fn test_driver_error_is_transparent() {
        let err = PoolError::driver(DuplicateKey);
        assert_eq!(err.to_string(), "duplicate key");
        assert!(err.driver_error::<DuplicateKey>().is_some());
        assert!(err.driver_error::<std::io::Error>().is_none());
    }

    #[test]
    fn test_capacity_classification() {
        assert!(PoolError::NoConnectionsAvailable { max: 4 }.is_capacity());
        assert!(PoolError::PoolFull { max: 4 }.is_capacity());
        assert!(PoolError::ConnectionPending("mysql-2".into()).is_capacity());
        assert!(!PoolError::UnknownConnection("postgres-1".into()).is_capacity());
        assert!(!PoolError::ConnectionNotFound("mysql-1".into()).is_capacity());
        assert!(!PoolError::driver(DuplicateKey).is_capacity());
    }

    #[test]
    fn test_display_names_connection() {
        let err = PoolError::ConnectionNotFound("mysql-9".into());
        assert!(err.to_string().contains("mysql-9"));

        let err = PoolError::NoConnectionsAvailable { max: 10 };
        assert!(err.to_string().contains("no idle connections"));
    }
}
