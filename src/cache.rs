//! Blocking read-through cache with single-flight loading.
//!
//! Each cache is a sharded, bounded LRU entry map plus an in-flight table
//! coordinating concurrent misses: among any number of callers racing on the
//! same absent key, exactly one runs the loader while the rest block until
//! its outcome is published. A loader failure is delivered to every current
//! waiter and does not poison the entry; the next call re-runs the loader.
//!
//! "Not found" is a first-class cached outcome (`None`), so repeated lookups
//! of absent rows do not hammer the backing store.

use crate::config::CacheConfig;
use crate::error::{AuthError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cached value with its expiry deadline.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: Option<V>,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: Option<V>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Outcome of an in-flight load, published to all waiters.
enum LoadState<V> {
    Pending,
    Ready(Option<V>),
    Failed(String),
}

struct Inflight<V> {
    state: Mutex<LoadState<V>>,
    done: Condvar,
}

impl<V> Inflight<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(LoadState::Pending),
            done: Condvar::new(),
        }
    }
}

/// Blocking read-through cache with TTL, LRU capacity and single-flight
/// miss handling.
pub struct BlockingCache<K, V> {
    shards: Box<[Mutex<LruCache<K, CacheEntry<V>>>]>,
    inflight: DashMap<K, Arc<Inflight<V>>>,
    ttl: Duration,
    stats: CacheStats,
}

impl<K, V> BlockingCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_capacity(
            config.max_entries,
            Duration::from_secs(config.ttl_seconds),
            config.shard_count,
        )
    }

    pub fn with_capacity(max_entries: usize, ttl: Duration, shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let per_shard = (max_entries / shard_count).max(1);
        let shards = (0..shard_count)
            .map(|_| {
                Mutex::new(LruCache::new(
                    NonZeroUsize::new(per_shard).expect("per-shard capacity is non-zero"),
                ))
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            inflight: DashMap::new(),
            ttl,
            stats: CacheStats::default(),
        }
    }

    fn shard(&self, key: &K) -> &Mutex<LruCache<K, CacheEntry<V>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Look up a live entry, dropping it if expired.
    fn lookup(&self, key: &K) -> Option<Option<V>> {
        let mut shard = self.shard(key).lock();
        match shard.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                shard.pop(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: K, value: Option<V>) {
        let mut shard = self.shard(&key).lock();
        if shard.len() == shard.cap().get() && !shard.contains(&key) {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        shard.put(key, CacheEntry::new(value, self.ttl));
    }

    /// Return the cached value for `key`, or run `loader` to produce it.
    ///
    /// Among concurrent callers missing on the same key, exactly one invokes
    /// the loader; the others block and receive the loaded value, the
    /// not-found sentinel, or the load failure.
    pub fn get_or_load<F>(&self, key: &K, loader: F) -> Result<Option<V>>
    where
        F: FnOnce(&K) -> Result<Option<V>>,
    {
        if let Some(value) = self.lookup(key) {
            return Ok(value);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        enum Role<V> {
            Leader(Arc<Inflight<V>>),
            Waiter(Arc<Inflight<V>>),
        }

        let role = match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => Role::Waiter(entry.get().clone()),
            Entry::Vacant(entry) => {
                let flight = Arc::new(Inflight::new());
                entry.insert(flight.clone());
                Role::Leader(flight)
            }
        };

        match role {
            Role::Waiter(flight) => {
                let mut state = flight.state.lock();
                while matches!(*state, LoadState::Pending) {
                    flight.done.wait(&mut state);
                }
                match &*state {
                    LoadState::Ready(value) => Ok(value.clone()),
                    LoadState::Failed(message) => Err(AuthError::CacheLoad(message.clone())),
                    LoadState::Pending => unreachable!("waited for a settled load"),
                }
            }
            Role::Leader(flight) => {
                self.stats.loads.fetch_add(1, Ordering::Relaxed);
                let result = loader(key);

                match &result {
                    Ok(value) => {
                        // Publish to the entry map only while this flight is
                        // still the registered one for the key. A `remove` or
                        // `clear` that ran mid-load detached it, and a
                        // superseded result must not resurrect the entry.
                        // Storing under the occupied slot and before releasing
                        // waiters keeps the entry visible to a caller arriving
                        // after the slot is gone.
                        if let Entry::Occupied(entry) = self.inflight.entry(key.clone()) {
                            if Arc::ptr_eq(entry.get(), &flight) {
                                self.store(key.clone(), value.clone());
                                entry.remove();
                            }
                        }
                        *flight.state.lock() = LoadState::Ready(value.clone());
                    }
                    Err(e) => {
                        self.stats.load_failures.fetch_add(1, Ordering::Relaxed);
                        self.inflight
                            .remove_if(key, |_, current| Arc::ptr_eq(current, &flight));
                        *flight.state.lock() = LoadState::Failed(e.to_string());
                    }
                }
                flight.done.notify_all();
                result
            }
        }
    }

    /// Peek without loading. Expired entries count as absent.
    pub fn get(&self, key: &K) -> Option<Option<V>> {
        self.lookup(key)
    }

    /// Drop one entry. Takes effect immediately for subsequent `get_or_load`
    /// calls on this cache: any load still in flight for the key is detached,
    /// so the next caller elects a fresh leader instead of adopting a result
    /// computed before the invalidation.
    pub fn remove(&self, key: &K) {
        self.inflight.remove(key);
        let removed = self.shard(key).lock().pop(key).is_some();
        if removed {
            self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop every entry, detaching all in-flight loads.
    pub fn clear(&self) {
        self.inflight.clear();
        for shard in self.shards.iter() {
            shard.lock().clear();
        }
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Hit/miss/load counters for one cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStats {
    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one cache's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache() -> BlockingCache<String, u64> {
        BlockingCache::with_capacity(64, Duration::from_secs(60), 4)
    }

    #[test]
    fn test_load_once_then_hit() {
        let cache = small_cache();
        let key = "k".to_string();

        let v1 = cache.get_or_load(&key, |_| Ok(Some(42))).unwrap();
        let v2 = cache
            .get_or_load(&key, |_| panic!("loader must not re-run on a hit"))
            .unwrap();

        assert_eq!(v1, Some(42));
        assert_eq!(v2, Some(42));
        let stats = cache.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_not_found_sentinel_is_cached() {
        let cache = small_cache();
        let key = "absent".to_string();

        assert_eq!(cache.get_or_load(&key, |_| Ok(None)).unwrap(), None);
        assert_eq!(
            cache
                .get_or_load(&key, |_| panic!("not-found must be cached"))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_remove_forces_reload() {
        let cache = small_cache();
        let key = "k".to_string();

        cache.get_or_load(&key, |_| Ok(Some(1))).unwrap();
        cache.remove(&key);
        let v = cache.get_or_load(&key, |_| Ok(Some(2))).unwrap();
        assert_eq!(v, Some(2));
        assert_eq!(cache.stats().loads, 2);
    }

    #[test]
    fn test_failure_does_not_poison() {
        let cache = small_cache();
        let key = "k".to_string();

        let err = cache
            .get_or_load(&key, |_| Err(AuthError::Store("backend down".to_string())))
            .unwrap_err();
        assert!(matches!(err, AuthError::Store(_)));

        // Next call retries the loader instead of returning a stale failure.
        let v = cache.get_or_load(&key, |_| Ok(Some(7))).unwrap();
        assert_eq!(v, Some(7));
    }

    #[test]
    fn test_ttl_expiry_reloads() {
        let cache: BlockingCache<String, u64> =
            BlockingCache::with_capacity(64, Duration::from_millis(10), 4);
        let key = "k".to_string();

        cache.get_or_load(&key, |_| Ok(Some(1))).unwrap();
        std::thread::sleep(Duration::from_millis(25));
        let v = cache.get_or_load(&key, |_| Ok(Some(2))).unwrap();
        assert_eq!(v, Some(2));
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        // One shard so capacity is exact.
        let cache: BlockingCache<u32, u32> =
            BlockingCache::with_capacity(2, Duration::from_secs(60), 1);

        cache.get_or_load(&1, |_| Ok(Some(1))).unwrap();
        cache.get_or_load(&2, |_| Ok(Some(2))).unwrap();
        cache.get_or_load(&3, |_| Ok(Some(3))).unwrap();

        assert_eq!(cache.len(), 2);
        // Key 1 was least recently used and must have been evicted.
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_concurrent_misses_run_loader_once() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Barrier;

        let cache: Arc<BlockingCache<String, u64>> = Arc::new(small_cache());
        let loads = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let loads = loads.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_load(&"hot".to_string(), |_| {
                            loads.fetch_add(1, Ordering::SeqCst);
                            // Hold the load open long enough for the others
                            // to pile up as waiters.
                            std::thread::sleep(Duration::from_millis(50));
                            Ok(Some(99))
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(99));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_detaches_pending_load() {
        use std::sync::mpsc;

        let cache: Arc<BlockingCache<String, u64>> = Arc::new(small_cache());
        let key = "k".to_string();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let stale = {
            let cache = cache.clone();
            let key = key.clone();
            std::thread::spawn(move || {
                cache.get_or_load(&key, |_| {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(Some(1))
                })
            })
        };

        // The load is held open; a write lands and invalidates the key.
        started_rx.recv().unwrap();
        cache.remove(&key);

        // The writer reading its own write must elect a fresh leader, not
        // join the detached flight.
        let fresh = cache.get_or_load(&key, |_| Ok(Some(2))).unwrap();
        assert_eq!(fresh, Some(2));

        // The detached flight settles with its pre-write value for callers
        // that joined before the invalidation, but must not overwrite the
        // entry map.
        release_tx.send(()).unwrap();
        assert_eq!(stale.join().unwrap().unwrap(), Some(1));
        assert_eq!(cache.get(&key), Some(Some(2)));
    }

    #[test]
    fn test_failure_propagates_to_waiters() {
        use std::sync::Barrier;

        let cache: Arc<BlockingCache<String, u64>> = Arc::new(small_cache());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_load(&"bad".to_string(), |_| {
                        std::thread::sleep(Duration::from_millis(50));
                        Err(AuthError::Store("backend down".to_string()))
                    })
                })
            })
            .collect();

        for handle in handles {
            let result = handle.join().unwrap();
            assert!(
                matches!(result, Err(AuthError::Store(_)) | Err(AuthError::CacheLoad(_))),
                "every caller must see the failure"
            );
        }
    }
}
