//! Bounded concurrency for accepted connections
//!
//! Event streams keep their connection open indefinitely, so the cap is
//! enforced at accept time: a connection over the limit is closed instead
//! of being queued.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps the number of connections served at once
#[derive(Clone)]
pub struct ConnectionLimit {
    semaphore: Arc<Semaphore>,
    max_connections: usize,
}

impl ConnectionLimit {
    /// Allow at most `max_connections` at a time
    ///
    /// # Panics
    ///
    /// Panics if `max_connections` is 0
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        assert!(max_connections > 0, "max_connections must be > 0");

        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Claim a slot, or `None` when the limit is reached
    pub fn try_acquire(&self) -> Option<ConnectionGuard> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| ConnectionGuard { _permit: permit })
    }

    /// Connections currently being served
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    /// Configured limit
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// Releases its slot when the connection task ends
pub struct ConnectionGuard {
    _permit: OwnedSemaphorePermit,
}
