use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Serializes mutations per identity.
///
/// The map holds at most `max_entries` idle locks; once it grows past that,
/// every lock nobody is holding or waiting on is dropped.
pub struct IdentityLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
    max_entries: usize,
}

impl IdentityLocks {
    pub fn new(max_entries: usize) -> Self {
        Self {
            locks: DashMap::new(),
            max_entries,
        }
    }

    pub async fn acquire(&self, identity: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        if self.locks.len() > self.max_entries {
            self.evict_idle();
        }
        metrics::gauge!(crate::observability::IDENTITY_LOCKS_ACTIVE).set(self.locks.len() as f64);
        lock.lock_owned().await
    }

    /// Drop locks held only by the map. Returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let evicted = before.saturating_sub(self.locks.len());
        if evicted > 0 {
            debug!("evicted {evicted} idle identity locks");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
