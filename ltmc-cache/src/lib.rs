//! ABOUTME: Key-scoped, TTL-bounded, LRU-capped cache adapter for the LTMC memory service
//! ABOUTME: Purely optional — any unavailability degrades callers to direct store reads
//!
//! Grounded on the LRU+mutex caching wrapper the teacher uses for embeddings
//! (`llmspell-memory::embeddings::cached`), generalized from a single
//! embedding cache into a general key/value store with per-entry TTL and
//! glob-style invalidation, since retrieval results, chat pages, todo pages,
//! and graph neighbor sets all share one cache here rather than each owning
//! a dedicated wrapper. Bounded by an LRU cap rather than left unbounded, so
//! a burst of distinct queries can't grow the cache without limit.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

/// Entry cap, independent of TTL. Sized generously for a single-process
/// memory service; eviction past this point is LRU, not TTL-driven.
const DEFAULT_CAPACITY: usize = 10_000;

/// Running hit/miss counters, exposed via `stats()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub invalidations: u64,
}

impl CacheStats {
    #[must_use]
    pub const fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                self.hits as f64 / total as f64
            }
        }
    }
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-process, TTL-bounded key/value cache.
///
/// `available` tracks whether the configured cache backend answered its
/// startup probe; when `false`, every method becomes a no-op and the
/// coordinator/retrieval pipeline fall back to direct store reads without
/// ever observing an error.
pub struct CacheAdapter {
    entries: Mutex<LruCache<String, Entry>>,
    stats: Mutex<CacheStats>,
    available: std::sync::atomic::AtomicBool,
}

impl Default for CacheAdapter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CacheAdapter {
    #[must_use]
    pub fn new(available: bool) -> Self {
        Self::with_capacity(available, DEFAULT_CAPACITY)
    }

    /// As [`Self::new`], but with an explicit entry cap instead of
    /// [`DEFAULT_CAPACITY`] — mainly so tests can exercise eviction without
    /// inserting ten thousand entries.
    #[must_use]
    pub fn with_capacity(available: bool, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or_else(|| NonZeroUsize::new(1).unwrap());
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(CacheStats::default()),
            available: std::sync::atomic::AtomicBool::new(available),
        }
    }

    /// Whether the cache backend is currently reachable. `false` means every
    /// other method is a silent no-op.
    #[must_use]
    pub fn available(&self) -> bool {
        self.available.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Probe result from startup (or a later health check); flips the
    /// degraded-mode flag.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, std::sync::atomic::Ordering::Relaxed);
        if !available {
            warn!("cache backend marked unavailable; operations will degrade to direct reads");
        }
    }

    /// `ok` if the backend is reachable, matching the spec's
    /// `health() -> ok|unavailable` contract.
    #[must_use]
    pub fn health(&self) -> &'static str {
        if self.available() {
            "ok"
        } else {
            "unavailable"
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    /// Look up `key`. A lazily-expired entry (past its TTL but not yet
    /// evicted) counts as a miss and is removed on the way out.
    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.available() {
            return None;
        }
        let mut entries = self.entries.lock();
        let hit = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        };
        drop(entries);

        let mut stats = self.stats.lock();
        if hit.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        hit
    }

    /// Store `value` under `key` with the given TTL. Overwrites any existing
    /// entry. Past [`DEFAULT_CAPACITY`] entries, the least-recently-used one
    /// is evicted regardless of its remaining TTL.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        if !self.available() {
            return;
        }
        self.entries.lock().put(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        self.stats.lock().sets += 1;
    }

    /// Invalidate every key matching `pattern`. A trailing `*` matches any
    /// suffix (`"retrieve:*"`); without one, `pattern` must match exactly.
    /// Invalidation always runs even while `available() == false`, so a
    /// degraded cache cannot later be flipped back on and serve entries that
    /// should have been invalidated while it was down.
    pub fn invalidate(&self, pattern: &str) {
        let mut entries = self.entries.lock();
        let removed = if let Some(prefix) = pattern.strip_suffix('*') {
            let keys: Vec<String> = entries
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                entries.pop(key);
            }
            keys.len()
        } else {
            usize::from(entries.pop(pattern).is_some())
        };
        drop(entries);
        if removed > 0 {
            debug!(pattern, removed, "invalidated cache entries");
        }
        self.stats.lock().invalidations += removed as u64;
    }

    /// Drop every entry under `scope` (a key prefix, e.g. `"graph:"`), or the
    /// whole cache if `scope` is empty.
    pub fn flush(&self, scope: &str) {
        if scope.is_empty() {
            self.entries.lock().clear();
            return;
        }
        self.invalidate(&format!("{scope}*"));
    }
}

/// `retrieve:{hash(query)}:{top_k}:{filters_hash}`
#[must_use]
pub fn retrieve_key(query_hash: &str, top_k: usize, filters_hash: &str) -> String {
    format!("retrieve:{query_hash}:{top_k}:{filters_hash}")
}

/// `chat:{conversation_id}:{source_tool}:{limit}`
#[must_use]
pub fn chat_key(conversation_id: &str, source_tool: Option<&str>, limit: i64) -> String {
    format!("chat:{conversation_id}:{}:{limit}", source_tool.unwrap_or("_"))
}

/// `todo:{status}:{priority}:{limit}`
#[must_use]
pub fn todo_key(status: Option<&str>, priority: Option<&str>, limit: i64) -> String {
    format!(
        "todo:{}:{}:{limit}",
        status.unwrap_or("_"),
        priority.unwrap_or("_")
    )
}

/// `graph:{entity}:{relation_type}`
#[must_use]
pub fn graph_key(entity: &str, relation_type: Option<&str>) -> String {
    format!("graph:{entity}:{}", relation_type.unwrap_or("_"))
}

/// Conservative prefix used to invalidate every retrieval entry touching a
/// given resource once a new Chunk lands for it.
#[must_use]
pub fn retrieve_invalidation_pattern() -> &'static str {
    "retrieve:*"
}

/// Prefix used to invalidate every cached neighbor set for `resource_id`
/// once a `ResourceLink` touching it is created.
#[must_use]
pub fn graph_invalidation_pattern(resource_id: i64) -> String {
    format!("graph:{resource_id}:*")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hit_then_expire() {
        let cache = CacheAdapter::new(true);
        cache.set("k", json!(1), Duration::from_millis(20));
        assert_eq!(cache.get("k"), Some(json!(1)));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn unavailable_cache_is_a_silent_no_op() {
        let cache = CacheAdapter::new(false);
        cache.set("k", json!(1), Duration::from_secs(60));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.health(), "unavailable");
    }

    #[test]
    fn wildcard_invalidation_matches_prefix() {
        let cache = CacheAdapter::new(true);
        cache.set("retrieve:a:5:x", json!(1), Duration::from_secs(60));
        cache.set("retrieve:b:5:x", json!(2), Duration::from_secs(60));
        cache.set("chat:c1:_:10", json!(3), Duration::from_secs(60));

        cache.invalidate("retrieve:*");

        assert_eq!(cache.get("retrieve:a:5:x"), None);
        assert_eq!(cache.get("retrieve:b:5:x"), None);
        assert_eq!(cache.get("chat:c1:_:10"), Some(json!(3)));
    }

    #[test]
    fn exact_invalidation_leaves_other_keys() {
        let cache = CacheAdapter::new(true);
        cache.set("todo:pending:_:10", json!(1), Duration::from_secs(60));
        cache.invalidate("todo:pending:_:10");
        assert_eq!(cache.get("todo:pending:_:10"), None);
    }

    #[test]
    fn flush_with_empty_scope_clears_everything() {
        let cache = CacheAdapter::new(true);
        cache.set("a", json!(1), Duration::from_secs(60));
        cache.set("b", json!(2), Duration::from_secs(60));
        cache.flush("");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn least_recently_used_entry_is_evicted_past_capacity() {
        let cache = CacheAdapter::with_capacity(true, 2);
        cache.set("a", json!(1), Duration::from_secs(60));
        cache.set("b", json!(2), Duration::from_secs(60));
        cache.set("c", json!(3), Duration::from_secs(60));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(json!(2)));
        assert_eq!(cache.get("c"), Some(json!(3)));
    }

    #[test]
    fn invalidation_runs_even_when_marked_unavailable() {
        let cache = CacheAdapter::new(true);
        cache.set("graph:1:*".to_string(), json!(1), Duration::from_secs(60));
        cache.set_available(false);
        cache.invalidate(&graph_invalidation_pattern(1));
        cache.set_available(true);
        assert_eq!(cache.get("graph:1:*"), None);
    }
}
