//! Recency Cache
//!
//! Bounded LRU from normalized URL to [`RewriteOutcome`]. A single mutex
//! guards the map and the recency order together, so every operation is
//! atomic with respect to every other.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::types::RewriteOutcome;

/// Hit/miss/eviction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

#[derive(Debug)]
struct Slot {
    outcome: RewriteOutcome,
    tick: u64,
}

#[derive(Debug, Default)]
struct LruState {
    entries: HashMap<String, Slot>,
    /// Recency order: oldest tick first.
    order: BTreeMap<u64, String>,
    tick: u64,
    /// Bumped by every `clear`.
    generation: u64,
}

impl LruState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &str) -> Option<RewriteOutcome> {
        let tick = self.next_tick();
        let slot = self.entries.get_mut(key)?;
        let old = std::mem::replace(&mut slot.tick, tick);
        let outcome = slot.outcome.clone();
        if let Some(k) = self.order.remove(&old) {
            self.order.insert(tick, k);
        }
        Some(outcome)
    }

    fn evict_oldest(&mut self) -> bool {
        match self.order.pop_first() {
            Some((_, key)) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }
}

/// Thread-safe LRU cache of rewrite outcomes.
#[derive(Debug)]
pub struct RecencyCache {
    capacity: usize,
    inner: Mutex<LruState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl RecencyCache {
    /// Create a cache holding at most `capacity` URLs. Zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(LruState {
                entries: HashMap::with_capacity(capacity.min(4096)),
                ..LruState::default()
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up `url` and mark it most recently used.
    pub fn get(&self, url: &str) -> Option<RewriteOutcome> {
        let found = self.inner.lock().touch(url);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Look up `url` without changing its recency or the counters.
    pub fn peek(&self, url: &str) -> Option<RewriteOutcome> {
        self.inner
            .lock()
            .entries
            .get(url)
            .map(|slot| slot.outcome.clone())
    }

    /// Insert or update `url`, evicting the least recently used entry if full.
    pub fn put(&self, url: impl Into<String>, outcome: RewriteOutcome) {
        if self.capacity == 0 {
            return;
        }
        let mut state = self.inner.lock();
        self.insert_locked(&mut state, url.into(), outcome);
    }

    /// Like [`put`](Self::put), but only if no `clear` happened since
    /// `generation` was read. Returns whether the entry was stored.
    pub fn put_if_current(&self, generation: u64, url: impl Into<String>, outcome: RewriteOutcome) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let mut state = self.inner.lock();
        if state.generation != generation {
            return false;
        }
        self.insert_locked(&mut state, url.into(), outcome);
        true
    }

    /// Current clear generation, for [`put_if_current`](Self::put_if_current).
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    fn insert_locked(&self, state: &mut LruState, url: String, outcome: RewriteOutcome) {
        let tick = state.next_tick();

        if let Some(slot) = state.entries.get_mut(&url) {
            let old = std::mem::replace(&mut slot.tick, tick);
            slot.outcome = outcome;
            state.order.remove(&old);
            state.order.insert(tick, url);
            return;
        }

        let mut evicted = 0;
        while state.entries.len() >= self.capacity && state.evict_oldest() {
            evicted += 1;
        }
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }

        state.order.insert(tick, url.clone());
        state.entries.insert(url, Slot { outcome, tick });
        debug_assert_eq!(state.entries.len(), state.order.len());
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.entries.clear();
        state.order.clear();
        state.generation = state.generation.wrapping_add(1);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            len: self.len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn rewrite(url: &str) -> RewriteOutcome {
        RewriteOutcome::Rewrite(url.to_string())
    }

    #[test]
    fn test_get_and_put() {
        let cache = RecencyCache::new(4);
        assert_eq!(cache.get("http://a/"), None);

        cache.put("http://a/", rewrite("https://a/"));
        cache.put("http://b/", RewriteOutcome::NoRule);
        assert_eq!(cache.get("http://a/"), Some(rewrite("https://a/")));
        assert_eq!(cache.get("http://b/"), Some(RewriteOutcome::NoRule));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.len), (2, 1, 2));
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = RecencyCache::new(3);
        cache.put("u1", RewriteOutcome::NoRule);
        cache.put("u2", RewriteOutcome::NoRule);
        cache.put("u3", RewriteOutcome::NoRule);

        // u1 becomes the most recently touched; u2 is now the oldest.
        assert!(cache.get("u1").is_some());
        cache.put("u4", RewriteOutcome::NoRule);

        assert_eq!(cache.len(), 3);
        assert!(cache.peek("u2").is_none());
        assert!(cache.peek("u1").is_some());
        assert!(cache.peek("u3").is_some());
        assert!(cache.peek("u4").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_untouched_oldest_goes_first() {
        let cache = RecencyCache::new(2);
        cache.put("u1", RewriteOutcome::NoRule);
        cache.put("u2", RewriteOutcome::NoRule);
        cache.put("u3", RewriteOutcome::NoRule);
        assert!(cache.peek("u1").is_none());
        assert!(cache.peek("u3").is_some());
    }

    #[test]
    fn test_update_refreshes_recency() {
        let cache = RecencyCache::new(2);
        cache.put("u1", RewriteOutcome::NoRule);
        cache.put("u2", RewriteOutcome::NoRule);
        cache.put("u1", rewrite("https://u1/"));
        cache.put("u3", RewriteOutcome::NoRule);

        assert_eq!(cache.peek("u1"), Some(rewrite("https://u1/")));
        assert!(cache.peek("u2").is_none());
    }

    #[test]
    fn test_peek_does_not_touch() {
        let cache = RecencyCache::new(2);
        cache.put("u1", RewriteOutcome::NoRule);
        cache.put("u2", RewriteOutcome::NoRule);
        assert!(cache.peek("u1").is_some());
        cache.put("u3", RewriteOutcome::NoRule);
        assert!(cache.peek("u1").is_none());
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = RecencyCache::new(0);
        cache.put("u1", RewriteOutcome::NoRule);
        assert!(cache.is_empty());
        assert!(cache.get("u1").is_none());
    }

    #[test]
    fn test_clear() {
        let cache = RecencyCache::new(2);
        cache.put("u1", RewriteOutcome::NoRule);
        cache.clear();
        assert!(cache.is_empty());
        cache.put("u2", RewriteOutcome::NoRule);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_after_clear_is_dropped() {
        let cache = RecencyCache::new(4);
        let generation = cache.generation();
        cache.clear();

        assert!(!cache.put_if_current(generation, "u1", RewriteOutcome::NoRule));
        assert!(cache.is_empty());

        let generation = cache.generation();
        assert!(cache.put_if_current(generation, "u1", RewriteOutcome::NoRule));
        assert_eq!(cache.peek("u1"), Some(RewriteOutcome::NoRule));
    }

    #[test]
    fn test_concurrent_access_stays_bounded() {
        let cache = Arc::new(RecencyCache::new(16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("http://h{}/{}", t, i % 40);
                        if cache.get(&key).is_none() {
                            cache.put(key, RewriteOutcome::NoRule);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.len() <= 16);
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 8 * 500);
    }
}
