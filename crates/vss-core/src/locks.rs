//! Per-user write serialization.
//!
//! Plan approval, admin plan changes, uploads and replacements all read a
//! user's state, decide, and write it back. Two of those running at once for
//! the same user could interleave and leave aggregates or statuses stale, so
//! each takes the user's lock for the whole read-decide-write sequence.
//! Different users never contend.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A lazily populated map of per-user async mutexes.
///
/// Entries are never removed. The map holds at most one mutex per user id
/// that has ever been locked, so it is bounded by the number of users.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock for `user_id`.
    ///
    /// The lock is released when the returned guard is dropped.
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(user_id.to_owned()).or_default())
        };
        lock.lock_owned().await
    }
}
