//! Connection lifecycle state.
//!
//! A pooled connection is either [`ConnectionState::NotInUse`] or
//! [`ConnectionState::InUse`]. The flag is the only thing standing between
//! two operations and one native handle, so every transition that grants
//! the handle is a compare-and-swap on [`AtomicState`], and a release only
//! takes effect for the claim that is still current.
//!
//! ```text
//! NotInUse -> InUse     (acquisition, or entering the execution wrapper)
//! InUse    -> NotInUse  (wrapped operation finished, failed or was dropped)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Busy/idle state of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionState {
    /// Connection is idle and available for anonymous acquisition.
    #[default]
    NotInUse = 0,
    /// Connection is bound to an in-flight operation.
    InUse = 1,
}

impl ConnectionState {
    /// Check if the connection is available for checkout.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::NotInUse)
    }

    /// Check if the connection is currently busy.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::InUse)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInUse => f.write_str("not in use"),
            Self::InUse => f.write_str("in use"),
        }
    }
}

const IN_USE_BIT: u64 = 1;

/// Atomic cell holding a [`ConnectionState`].
///
/// Bit 0 is the state; the remaining bits count transitions. Every write
/// bumps the count, so a [`Claim`] identifies exactly one `InUse` period and
/// can only be released while that period is still current.
#[derive(Debug, Default)]
pub(crate) struct AtomicState(AtomicU64);

/// Proof that the holder moved a connection `NotInUse -> InUse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Claim(u64);

impl AtomicState {
    fn next(raw: u64, state: ConnectionState) -> u64 {
        ((raw >> 1).wrapping_add(1) << 1) | state as u64
    }

    pub(crate) fn load(&self) -> ConnectionState {
        if self.0.load(Ordering::Acquire) & IN_USE_BIT == 0 {
            ConnectionState::NotInUse
        } else {
            ConnectionState::InUse
        }
    }

    /// Overwrite the state, invalidating any outstanding claim.
    pub(crate) fn store(&self, state: ConnectionState) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            match self.0.compare_exchange_weak(
                current,
                Self::next(current, state),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Move `NotInUse -> InUse`. Returns `None` if the connection was busy.
    pub(crate) fn try_claim(&self) -> Option<Claim> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current & IN_USE_BIT != 0 {
                return None;
            }
            let claimed = Self::next(current, ConnectionState::InUse);
            match self.0.compare_exchange_weak(
                current,
                claimed,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(Claim(claimed)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Move `InUse -> NotInUse` if `claim` is still the current one.
    ///
    /// Returns `false` when the state was overwritten or re-claimed since,
    /// in which case it is left alone.
    pub(crate) fn release(&self, claim: Claim) -> bool {
        self.0
            .compare_exchange(
                claim.0,
                Self::next(claim.0, ConnectionState::NotInUse),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Releases a claim when dropped.
///
/// Held across the driver call so the reset runs on success, on error and
/// when the future is dropped mid-flight.
pub(crate) struct ReleaseOnDrop<'a> {
    pub(crate) state: &'a AtomicState,
    pub(crate) claim: Claim,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.state.release(self.claim);
    }
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection was last handed out or finished an operation.
    pub last_used_at: Instant,
    /// Number of times the connection has been acquired or run a statement.
    pub checkout_count: u64,
}

impl ConnectionMetadata {
    /// Create metadata for a new connection.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
        }
    }

    /// Time since the connection was created.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection was last used.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    pub(crate) fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
    }

    pub(crate) fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
    }
}

impl Default for ConnectionMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_availability() {
        assert!(ConnectionState::NotInUse.is_available());
        assert!(!ConnectionState::InUse.is_available());
        assert!(ConnectionState::InUse.is_busy());
        assert_eq!(ConnectionState::default(), ConnectionState::NotInUse);
    }

    #[test]
    fn test_atomic_state_claim_is_exclusive() {
        let state = AtomicState::default();
        let claim = state.try_claim().unwrap();
        assert_eq!(state.load(), ConnectionState::InUse);
        assert!(state.try_claim().is_none());

        assert!(state.release(claim));
        assert_eq!(state.load(), ConnectionState::NotInUse);
        assert!(state.try_claim().is_some());
    }

    #[test]
    fn test_release_on_drop() {
        let state = AtomicState::default();
        let claim = state.try_claim().unwrap();
        {
            let _guard = ReleaseOnDrop {
                state: &state,
                claim,
            };
            assert_eq!(state.load(), ConnectionState::InUse);
        }
        assert_eq!(state.load(), ConnectionState::NotInUse);
    }

    #[test]
    fn test_stale_release_keeps_newer_claim() {
        let state = AtomicState::default();
        let first = state.try_claim().unwrap();

        // Released early by hand, then taken by someone else.
        state.store(ConnectionState::NotInUse);
        let second = state.try_claim().unwrap();
        assert_ne!(first, second);

        assert!(!state.release(first));
        assert_eq!(state.load(), ConnectionState::InUse);

        assert!(state.release(second));
        assert_eq!(state.load(), ConnectionState::NotInUse);
    }

    #[test]
    fn test_store_invalidates_claim() {
        let state = AtomicState::default();
        let claim = state.try_claim().unwrap();

        state.store(ConnectionState::InUse);
        assert!(!state.release(claim));
        assert_eq!(state.load(), ConnectionState::InUse);
    }

    #[test]
    fn test_connection_metadata_checkout() {
        let mut meta = ConnectionMetadata::new();
        assert_eq!(meta.checkout_count, 0);

        meta.mark_checkout();
        meta.mark_checkout();
        meta.mark_checkin();

        assert_eq!(meta.checkout_count, 2);
        assert!(meta.last_used_at >= meta.created_at);
    }
}
