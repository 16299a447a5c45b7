//! Per-key mutual exclusion with bounded waits.
//!
//! Each key maps to its own async mutex. Entries are created on demand and pruned once no
//! guard or waiter references them, so the table only grows with concurrently contended keys.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// Waiting for a key exceeded the configured bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockTimeout;

pub struct KeyedLocks<K> {
    entries: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
    timeout: Duration,
}

/// Holds a key until dropped.
pub struct KeyGuard<K: Eq + Hash + Clone> {
    _guard: OwnedMutexGuard<()>,
    key: K,
}

impl<K: Eq + Hash + Clone> KeyGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + Clone + Send + 'static> KeyedLocks<K> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub async fn acquire(&self, key: K) -> Result<KeyGuard<K>, LockTimeout> {
        let slot = {
            let mut entries = self.lock_entries();
            if entries.len() > 64 {
                // Only this table and live guards hold references; a count of one is idle.
                entries.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        match tokio::time::timeout(self.timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(KeyGuard { _guard: guard, key }),
            Err(_) => Err(LockTimeout),
        }
    }

    /// Acquires every key in ascending order. Callers that need more than one key must go
    /// through here so that overlapping sets cannot deadlock.
    pub async fn acquire_many(&self, keys: &[K]) -> Result<Vec<KeyGuard<K>>, LockTimeout>
    where
        K: Ord,
    {
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            guards.push(self.acquire(key).await?);
        }
        Ok(guards)
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.lock_entries().len()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<K, Arc<tokio::sync::Mutex<()>>>> {
        match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => {
                tracing::warn!("keyed lock table poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}
