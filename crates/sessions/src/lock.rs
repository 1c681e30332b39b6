//! Named mutual exclusion for session operations.

use std::{sync::Arc, time::Duration};

use {
    dashmap::DashMap,
    tokio::sync::{Mutex, OwnedMutexGuard},
};

/// Lock acquisition exceeded its deadline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not lock session '{name}' within {timeout:?}")]
pub struct LockTimeout {
    pub name: String,
    pub timeout: Duration,
}

/// A map of per-name async mutexes with a bounded acquisition wait.
///
/// Operations on different names proceed fully concurrently; waiters on the
/// same name queue without bound but give up after the configured timeout.
/// Locks live for the process lifetime; the map is bounded by the set of
/// session names ever touched.
pub struct NamedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl NamedLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Acquire the lock for `name`, waiting at most the configured timeout.
    pub async fn acquire(&self, name: &str) -> Result<OwnedMutexGuard<()>, LockTimeout> {
        let lock = self
            .locks
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        tokio::time::timeout(self.timeout, lock.lock_owned())
            .await
            .map_err(|_| LockTimeout {
                name: name.to_owned(),
                timeout: self.timeout,
            })
    }
}
