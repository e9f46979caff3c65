//! Per-resource write serialization (§4.1 concurrency: "writes to the same
//! Resource serialize on a per-resource lock keyed by `file_name` and by
//! `resource_id`").
//!
//! Grounded on the `DashMap<String, ...>` lock-table idiom the teacher uses
//! throughout (e.g. `llmspell-memory`'s `DashMap`-backed episodic cache): a
//! map of lazily-created `tokio::sync::Mutex`es, one per key, never removed
//! (keys are resource identities, not request-scoped).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily-allocated per-key mutexes, keyed by either `file_name` or
/// `resource_id` (stringified) so both addressing schemes hit the same lock.
#[derive(Default)]
pub struct ResourceLockTable {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ResourceLockTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, creating it if this is the first writer to
    /// ever touch it.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes_concurrent_writers() {
        let table = Arc::new(ResourceLockTable::new());
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let table = table.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = table.lock("doc.md").await;
                let before = counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                assert_eq!(counter.load(Ordering::SeqCst), before + 1);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let table = ResourceLockTable::new();
        let guard_a = table.lock("a.md").await;
        let guard_b = tokio::time::timeout(Duration::from_millis(50), table.lock("b.md")).await;
        assert!(guard_b.is_ok());
        drop(guard_a);
    }
}
