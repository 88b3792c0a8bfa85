//! Per-key serialization gate.
//!
//! An arena of async mutexes keyed by customer identifier. At most one task
//! holds a given key at a time; distinct keys never block each other. The
//! arena is an injected component with its own lifecycle, so independent
//! instances stay isolated in tests and on teardown.
//!
//! Entries are reclaimed opportunistically: every acquisition sweeps out keys
//! whose mutex has no holder and no waiters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyedMutex {
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one exclusive section. Dropping the guard
/// releases the key on every exit path, including errors and panics.
#[derive(Debug)]
pub struct KeyGuard {
    _permit: OwnedMutexGuard<()>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `key` is free, then claims it.
    pub async fn acquire(&self, key: &str) -> KeyGuard {
        let entry = self.entry(key);
        KeyGuard {
            _permit: entry.lock_owned().await,
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up after `limit`.
    /// Returns `None` on timeout; the key is left untouched.
    pub async fn acquire_timeout(&self, key: &str, limit: Duration) -> Option<KeyGuard> {
        let entry = self.entry(key);
        match tokio::time::timeout(limit, entry.lock_owned()).await {
            Ok(permit) => Some(KeyGuard { _permit: permit }),
            Err(_) => None,
        }
    }

    /// Number of keys currently tracked in the arena.
    pub fn tracked_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // A strong count of 1 means the map holds the only reference: no
        // holder, no waiter.
        locks.retain(|_, entry| Arc::strong_count(entry) > 1);
        locks.entry(key.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn same_key_serializes() {
        let gate = Arc::new(KeyedMutex::new());
        let in_section = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let in_section = Arc::clone(&in_section);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                let _guard = gate.acquire("cus_1").await;
                let concurrent = in_section.fetch_add(1, Ordering::SeqCst);
                assert_eq!(concurrent, 0, "two holders inside the same key");
                tokio::task::yield_now().await;
                in_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block() {
        let gate = KeyedMutex::new();
        let _a = gate.acquire("cus_1").await;
        // Must complete immediately even though cus_1 is held.
        let b = gate
            .acquire_timeout("cus_2", Duration::from_millis(50))
            .await;
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn acquire_timeout_gives_up_on_held_key() {
        let gate = KeyedMutex::new();
        let _held = gate.acquire("cus_1").await;
        let attempt = gate
            .acquire_timeout("cus_1", Duration::from_millis(20))
            .await;
        assert!(attempt.is_none());
    }

    #[tokio::test]
    async fn released_keys_are_reclaimed() {
        let gate = KeyedMutex::new();
        {
            let _guard = gate.acquire("cus_1").await;
            assert_eq!(gate.tracked_keys(), 1);
        }
        // The sweep runs on the next acquisition.
        let _other = gate.acquire("cus_2").await;
        assert_eq!(gate.tracked_keys(), 1);
    }
}
