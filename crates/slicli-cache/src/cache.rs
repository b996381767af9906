//! Output cache with heap-indexed LRU eviction

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use slicli_types::PluginOutput;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upper bound on the summed size of cached outputs
    pub max_bytes: usize,
    /// TTL applied when `set` is called without an explicit one
    pub default_ttl: Duration,
    /// Period between background expiry sweeps
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 100 * 1024 * 1024,
            default_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub size_bytes: usize,
    pub max_bytes: usize,
    pub hit_rate: f64,
}

struct CacheEntry {
    output: PluginOutput,
    size_bytes: usize,
    expires_at: Instant,
    last_access: Instant,
    hits: u64,
    /// Slot of this entry's key in the eviction heap
    heap_index: usize,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Min-heap of keys ordered by `last_access` (earliest = next evicted)
    heap: Vec<String>,
    current_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Bounded key→output store with TTL and LRU eviction.
///
/// All state sits behind one reader-writer lock; `get` takes the write path
/// because a hit mutates access time and re-heapifies.
pub struct OutputCache {
    config: CacheConfig,
    state: RwLock<CacheState>,
}

impl OutputCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Look up a cached output. Expired entries are removed on access and
    /// reported as a miss. A lookup never fails.
    pub fn get(&self, key: &str) -> Option<PluginOutput> {
        let mut state = self.state.write().expect("cache lock poisoned");
        let now = Instant::now();

        let expired = match state.entries.get(key) {
            Some(entry) => now > entry.expires_at,
            None => {
                state.misses += 1;
                return None;
            }
        };

        if expired {
            remove_key(&mut state, key);
            state.misses += 1;
            return None;
        }

        state.hits += 1;
        let entry = state.entries.get_mut(key).expect("entry checked above");
        entry.hits += 1;
        entry.last_access = now;
        let idx = entry.heap_index;
        let output = entry.output.clone();
        // Access time only grows, so the entry can only sink
        sift_down(&mut state, idx);
        Some(output)
    }

    /// Insert an output under `key`. `ttl` falls back to the configured
    /// default. Inserting an over-sized output is refused rather than
    /// flushing the whole cache for an entry that still would not fit.
    pub fn set(&self, key: impl Into<String>, output: PluginOutput, ttl: Option<Duration>) {
        let key = key.into();
        let size = output.size_bytes();
        if size > self.config.max_bytes {
            warn!(
                key = %key,
                size_bytes = size,
                max_bytes = self.config.max_bytes,
                "Refusing to cache over-sized output"
            );
            return;
        }

        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let now = Instant::now();
        let mut state = self.state.write().expect("cache lock poisoned");

        // Replace semantics: drop any previous entry for this key first
        remove_key(&mut state, &key);

        // Expired entries go before live ones feel LRU pressure
        if state.current_bytes + size > self.config.max_bytes {
            sweep_expired(&mut state, now);
        }
        while state.current_bytes + size > self.config.max_bytes && !state.heap.is_empty() {
            let victim = state.heap[0].clone();
            remove_key(&mut state, &victim);
            state.evictions += 1;
            debug!(key = %victim, "Evicted least-recently-accessed entry");
        }

        let heap_index = state.heap.len();
        state.heap.push(key.clone());
        state.entries.insert(
            key,
            CacheEntry {
                output,
                size_bytes: size,
                expires_at: now + ttl,
                last_access: now,
                hits: 0,
                heap_index,
            },
        );
        state.current_bytes += size;
        sift_up(&mut state, heap_index);
    }

    /// Remove one entry by key. Unknown keys are ignored.
    pub fn remove(&self, key: &str) {
        let mut state = self.state.write().expect("cache lock poisoned");
        remove_key(&mut state, key);
    }

    /// Drop every entry. Counters survive; `entries`/`size` go to zero.
    pub fn clear(&self) {
        let mut state = self.state.write().expect("cache lock poisoned");
        state.entries.clear();
        state.heap.clear();
        state.current_bytes = 0;
    }

    /// Remove every entry whose TTL has elapsed. Called by the background
    /// sweep and usable directly.
    pub fn cleanup(&self) {
        let mut state = self.state.write().expect("cache lock poisoned");
        let removed = sweep_expired(&mut state, Instant::now());
        if removed > 0 {
            debug!(removed, "Expired cache entries swept");
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read().expect("cache lock poisoned");
        let queries = state.hits + state.misses;
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            entries: state.entries.len(),
            size_bytes: state.current_bytes,
            max_bytes: self.config.max_bytes,
            hit_rate: if queries == 0 {
                0.0
            } else {
                state.hits as f64 / queries as f64
            },
        }
    }

    /// Spawn the periodic expiry sweep. The task runs until `token` is
    /// cancelled.
    pub fn spawn_cleanup_task(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval = cache.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => cache.cleanup(),
                }
            }
            debug!("Cache cleanup task stopped");
        })
    }

    #[cfg(test)]
    fn assert_heap_invariant(&self) {
        let state = self.state.read().expect("cache lock poisoned");
        assert_eq!(state.heap.len(), state.entries.len());
        for (idx, key) in state.heap.iter().enumerate() {
            let entry = state.entries.get(key).expect("heap key missing from map");
            assert_eq!(entry.heap_index, idx, "stale heap index for {key}");
            let parent = idx.wrapping_sub(1) / 2;
            if idx > 0 {
                let parent_access = state.entries[&state.heap[parent]].last_access;
                assert!(parent_access <= entry.last_access, "heap order violated");
            }
        }
    }
}

/// Remove `key` from the map and its slot from the heap. Returns the freed
/// size, zero when the key was absent.
fn remove_key(state: &mut CacheState, key: &str) -> usize {
    let Some(entry) = state.entries.remove(key) else {
        return 0;
    };
    state.current_bytes -= entry.size_bytes;

    let idx = entry.heap_index;
    let last = state.heap.len() - 1;
    state.heap.swap(idx, last);
    state.heap.pop();
    if idx <= last && idx < state.heap.len() {
        let moved = state.heap[idx].clone();
        state
            .entries
            .get_mut(&moved)
            .expect("moved key missing from map")
            .heap_index = idx;
        // The filler may be older or newer than the removed entry
        sift_down(state, idx);
        sift_up(state, idx);
    }
    entry.size_bytes
}

fn sweep_expired(state: &mut CacheState, now: Instant) -> usize {
    let expired: Vec<String> = state
        .entries
        .iter()
        .filter(|(_, entry)| now > entry.expires_at)
        .map(|(key, _)| key.clone())
        .collect();
    let count = expired.len();
    for key in expired {
        remove_key(state, &key);
    }
    count
}

fn access_at(state: &CacheState, idx: usize) -> Instant {
    state.entries[&state.heap[idx]].last_access
}

fn heap_swap(state: &mut CacheState, a: usize, b: usize) {
    state.heap.swap(a, b);
    for idx in [a, b] {
        let key = state.heap[idx].clone();
        state
            .entries
            .get_mut(&key)
            .expect("heap key missing from map")
            .heap_index = idx;
    }
}

fn sift_up(state: &mut CacheState, mut idx: usize) {
    while idx > 0 {
        let parent = (idx - 1) / 2;
        if access_at(state, idx) >= access_at(state, parent) {
            break;
        }
        heap_swap(state, idx, parent);
        idx = parent;
    }
}

fn sift_down(state: &mut CacheState, mut idx: usize) {
    let len = state.heap.len();
    loop {
        let left = 2 * idx + 1;
        let right = 2 * idx + 2;
        let mut smallest = idx;
        if left < len && access_at(state, left) < access_at(state, smallest) {
            smallest = left;
        }
        if right < len && access_at(state, right) < access_at(state, smallest) {
            smallest = right;
        }
        if smallest == idx {
            break;
        }
        heap_swap(state, idx, smallest);
        idx = smallest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_of_size(bytes: usize) -> PluginOutput {
        PluginOutput::html("x".repeat(bytes))
    }

    fn cache(max_bytes: usize) -> OutputCache {
        OutputCache::new(CacheConfig {
            max_bytes,
            default_ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
        })
    }

    #[test]
    fn get_returns_what_set_stored() {
        let cache = cache(10_000);
        cache.set("k", PluginOutput::html("<p>one</p>"), None);

        let hit = cache.get("k").expect("expected a hit");
        assert_eq!(hit.html, "<p>one</p>");
        assert!(cache.get("absent").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn lru_eviction_drops_earliest_accessed() {
        let cache = cache(1000);
        for i in 0..10 {
            cache.set(format!("k{i}"), output_of_size(200), None);
            // Distinct access times so eviction order is deterministic
            std::thread::sleep(Duration::from_millis(2));
        }
        cache.assert_heap_invariant();

        let stats = cache.stats();
        assert!(stats.size_bytes <= 1000);
        assert_eq!(stats.entries, 5);
        assert_eq!(stats.evictions, 5);
        // The five earliest entries are gone, the five latest remain
        for i in 0..5 {
            assert!(cache.get(&format!("k{i}")).is_none(), "k{i} should be evicted");
        }
        for i in 5..10 {
            assert!(cache.get(&format!("k{i}")).is_some(), "k{i} should survive");
        }
    }

    #[test]
    fn hit_refreshes_eviction_order() {
        let cache = cache(600);
        cache.set("old", output_of_size(200), None);
        std::thread::sleep(Duration::from_millis(2));
        cache.set("mid", output_of_size(200), None);
        std::thread::sleep(Duration::from_millis(2));
        cache.set("new", output_of_size(200), None);
        std::thread::sleep(Duration::from_millis(2));

        // Touch "old" so "mid" becomes the eviction candidate
        assert!(cache.get("old").is_some());
        cache.set("extra", output_of_size(200), None);
        cache.assert_heap_invariant();

        assert!(cache.get("old").is_some());
        assert!(cache.get("mid").is_none());
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn expired_entries_are_lazily_removed() {
        let cache = cache(10_000);
        cache.set("k", output_of_size(10), Some(Duration::from_millis(5)));
        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.get("k").is_none());
        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn cleanup_sweeps_all_expired() {
        let cache = cache(10_000);
        cache.set("short", output_of_size(10), Some(Duration::from_millis(5)));
        cache.set("long", output_of_size(10), Some(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(20));

        cache.cleanup();
        cache.assert_heap_invariant();

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert!(cache.get("long").is_some());
    }

    #[test]
    fn oversized_output_is_refused() {
        let cache = cache(100);
        cache.set("keep", output_of_size(80), None);
        cache.set("huge", output_of_size(500), None);

        assert!(cache.get("huge").is_none());
        assert!(cache.get("keep").is_some(), "existing entries must survive");
    }

    #[test]
    fn replace_same_key_updates_size() {
        let cache = cache(1000);
        cache.set("k", output_of_size(400), None);
        cache.set("k", output_of_size(100), None);
        cache.assert_heap_invariant();

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.size_bytes, 100);
    }

    #[test]
    fn clear_empties_cache() {
        let cache = cache(1000);
        cache.set("a", output_of_size(10), None);
        cache.set("b", output_of_size(10), None);
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.size_bytes, 0);
    }

    #[test]
    fn remove_keeps_heap_consistent() {
        let cache = cache(10_000);
        for i in 0..8 {
            cache.set(format!("k{i}"), output_of_size(10), None);
            std::thread::sleep(Duration::from_millis(1));
        }
        cache.remove("k3");
        cache.remove("k0");
        cache.remove("missing");
        cache.assert_heap_invariant();
        assert_eq!(cache.stats().entries, 6);
    }

    #[test]
    fn concurrent_get_set_is_safe() {
        let cache = Arc::new(cache(100_000));
        let mut handles = Vec::new();
        for t in 0..4 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("k{}", (t * 31 + i) % 16);
                    cache.set(&key, PluginOutput::html("payload"), None);
                    if let Some(output) = cache.get(&key) {
                        assert_eq!(output.html, "payload");
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        cache.assert_heap_invariant();
    }

    #[tokio::test]
    async fn background_cleanup_task_sweeps() {
        let cache = Arc::new(OutputCache::new(CacheConfig {
            max_bytes: 10_000,
            default_ttl: Duration::from_millis(5),
            cleanup_interval: Duration::from_millis(10),
        }));
        cache.set("k", PluginOutput::html("gone soon"), None);

        let token = CancellationToken::new();
        let handle = cache.spawn_cleanup_task(token.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.stats().entries, 0);

        token.cancel();
        handle.await.unwrap();
    }
}
