//! Per-key async locks.
//!
//! Script rewrites and fingerprint file I/O are serialized per key. Locks for
//! unrelated keys never contend beyond one `DashMap` shard lookup.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

const PRUNE_THRESHOLD: usize = 64;

/// Registry of async mutexes, one per key, created on demand
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn handle(&self, key: &K) -> Arc<Mutex<()>> {
        if self.locks.len() > PRUNE_THRESHOLD {
            // Only the registry holds these; nobody is waiting on them.
            self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(self.locks.entry(key.clone()).or_default().value())
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        self.handle(key).lock_owned().await
    }

    /// Take exclusive access to `key` if nobody holds it
    pub fn try_lock(&self, key: &K) -> Option<OwnedMutexGuard<()>> {
        self.handle(key).try_lock_owned().ok()
    }

    /// Number of registered keys
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no key is registered
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks: KeyedLocks<&'static str> = KeyedLocks::new();
        let guard = locks.lock(&"script.ts").await;
        assert!(locks.try_lock(&"script.ts").is_none());
        drop(guard);
        assert!(locks.try_lock(&"script.ts").is_some());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks: Arc<KeyedLocks<&'static str>> = Arc::new(KeyedLocks::new());
        let _a = locks.lock(&"a.ts").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock(&"b.ts")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks: KeyedLocks<usize> = KeyedLocks::new();
        let held = locks.lock(&0).await;
        for i in 1..=PRUNE_THRESHOLD + 5 {
            drop(locks.lock(&i).await);
        }
        assert!(locks.len() <= PRUNE_THRESHOLD + 1);
        assert!(locks.try_lock(&0).is_none());
        drop(held);
    }
}
