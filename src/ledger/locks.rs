//! Per-reference serialization.
//!
//! Webhook deliveries, API calls and the expiry worker touching the same
//! reference run one at a time. Different references never contend.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Entries beyond this count trigger a sweep of idle locks.
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Default)]
pub struct ReferenceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ReferenceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `reference`. Released on drop.
    pub async fn acquire(&self, reference: &str) -> OwnedMutexGuard<()> {
        if self.locks.len() > PRUNE_THRESHOLD {
            self.prune();
        }
        let lock = self
            .locks
            .entry(reference.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop locks nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
