//! Per-user exclusive locks.
//!
//! RocksDB does not serialize read-modify-write cycles by itself, so
//! every balance-mutating operation takes the owning user's lock before
//! reading and holds it through the atomic commit. This is the row-lock
//! equivalent for the single shared mutable resource (the balance);
//! audit, settlement, and usage rows are append-only and need no lock
//! beyond commit atomicity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tally_core::UserId;

/// A shared table of per-user mutexes.
///
/// Cloning is cheap and shares the table; the engine, compensation
/// processor, and cleanup service must all hold clones of the same
/// instance so their writes serialize against each other.
#[derive(Clone, Default)]
pub struct UserLocks {
    inner: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl UserLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lock cell for a user, creating it on first use.
    ///
    /// The caller holds the returned `Arc` and locks it:
    ///
    /// ```ignore
    /// let cell = locks.cell_for(user_id);
    /// let _guard = cell.lock().unwrap_or_else(PoisonError::into_inner);
    /// ```
    #[must_use]
    pub fn cell_for(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(user_id).or_default().clone()
    }

    /// Drop cells no caller currently holds. Run by the cleanup sweep so
    /// the table does not grow with every user ever seen.
    pub fn prune_unused(&self) -> usize {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, cell| Arc::strong_count(cell) > 1);
        before - map.len()
    }

    /// Number of tracked users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
