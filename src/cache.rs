//! Block cache with an S3-FIFO admission policy.
//!
//! New entries enter a small probationary queue; entries re-referenced
//! while probationary are promoted into the main queue, while one-hit
//! wonders fall through to a ghost list that remembers recently evicted
//! keys. Frequency counters are clamped so a burst of hits cannot pin an
//! entry forever.
//!
//! The cache is internally synchronized: `get`/`insert` take `&self` so
//! one cache instance can be shared by every reader of a delta file set.
//! An [`EvictionCallback`] is invoked synchronously while an entry is
//! evicted; callbacks must not re-enter the cache, or they will deadlock
//! on the interior lock.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Maximum frequency limit for an entry in the cache.
const MAX_FREQUENCY_LIMIT: u8 = 3;

/// Hook invoked synchronously as entries fall out of the cache.
pub trait EvictionCallback<K, V>: Send + Sync {
    fn evicted_entry(&self, key: &K, value: &V);
}

struct Entry<K, V> {
    key: K,
    value: V,
    freq: AtomicU8,
}

impl<K: Clone, V: Clone> Entry<K, V> {
    fn new(key: K, value: V) -> Self {
        Entry {
            key,
            value,
            freq: AtomicU8::new(0),
        }
    }
}

struct CacheInner<K, V> {
    max_main_size: usize,
    max_cache_size: usize,
    /// New entries are added to this queue.
    small: VecDeque<Entry<K, V>>,
    /// Entries accessed at least twice are moved to this queue.
    main: VecDeque<Entry<K, V>>,
    /// Keys evicted from small before their second access.
    ghost: VecDeque<K>,
}

/// Shared, internally synchronized S3-FIFO cache.
pub struct Cache<K, V>
where
    K: PartialEq + Eq + Hash + Clone + Debug,
    V: Clone,
{
    inner: Mutex<CacheInner<K, V>>,
    eviction_cb: Option<Arc<dyn EvictionCallback<K, V>>>,
    stats: Stats,
}

impl<K, V> Cache<K, V>
where
    K: PartialEq + Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new(max_cache_size: usize, eviction_cb: Option<Arc<dyn EvictionCallback<K, V>>>) -> Self {
        let max_small_size = max_cache_size / 10;
        let max_main_size = max_cache_size - max_small_size;
        Cache {
            inner: Mutex::new(CacheInner {
                max_main_size,
                max_cache_size,
                small: VecDeque::new(),
                main: VecDeque::new(),
                ghost: VecDeque::new(),
            }),
            eviction_cb,
            stats: Stats::new(),
        }
    }

    /// Returns a clone of the cached value, bumping its frequency.
    pub fn get(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock().unwrap();
        let found = inner
            .small
            .iter()
            .chain(inner.main.iter())
            .find(|e| e.key == *key);
        match found {
            Some(entry) => {
                let freq = entry.freq.load(Ordering::SeqCst);
                entry
                    .freq
                    .store((freq + 1).min(MAX_FREQUENCY_LIMIT), Ordering::SeqCst);
                self.stats.hit();
                Some(entry.value.clone())
            }
            None => {
                self.stats.miss();
                None
            }
        }
    }

    /// Insert an entry, evicting as needed to stay within capacity. A
    /// zero-capacity cache stores nothing.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock().unwrap();
        if inner.max_cache_size == 0 {
            return;
        }
        self.evict(&mut inner);

        // Keys seen in the ghost list earned a second chance: admit them
        // straight into the main queue.
        let entry = Entry::new(key.clone(), value);
        if let Some(pos) = inner.ghost.iter().position(|k| *k == key) {
            inner.ghost.remove(pos);
            inner.main.push_back(entry);
        } else {
            inner.small.push_back(entry);
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.small.len() + inner.main.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses) counters.
    pub fn stats(&self) -> (usize, usize) {
        self.stats.get()
    }

    fn evict(&self, inner: &mut CacheInner<K, V>) {
        while inner.small.len() + inner.main.len() >= inner.max_cache_size {
            if inner.main.len() >= inner.max_main_size || inner.small.is_empty() {
                self.evict_main(inner);
            } else {
                self.evict_small(inner);
            }
        }
    }

    fn evict_main(&self, inner: &mut CacheInner<K, V>) {
        while let Some(head) = inner.main.pop_front() {
            let freq = head.freq.load(Ordering::SeqCst);
            if freq > 0 {
                head.freq.store(freq - 1, Ordering::SeqCst);
                inner.main.push_back(head);
            } else {
                self.notify_evicted(&head);
                break;
            }
        }
    }

    fn evict_small(&self, inner: &mut CacheInner<K, V>) {
        while let Some(head) = inner.small.pop_front() {
            if head.freq.load(Ordering::SeqCst) > 1 {
                inner.main.push_back(head);
            } else {
                if inner.ghost.len() >= inner.max_cache_size {
                    inner.ghost.pop_front();
                }
                inner.ghost.push_back(head.key.clone());
                self.notify_evicted(&head);
                break;
            }
        }
    }

    fn notify_evicted(&self, entry: &Entry<K, V>) {
        if let Some(cb) = &self.eviction_cb {
            cb.evicted_entry(&entry.key, &entry.value);
        }
    }
}

struct Stats {
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl Stats {
    fn new() -> Self {
        Stats {
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::SeqCst);
    }

    fn get(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::SeqCst),
            self.misses.load(Ordering::SeqCst),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_insert_and_get() {
        let cache: Cache<&str, &str> = Cache::new(4, None);
        cache.insert("apple", "red");
        cache.insert("banana", "yellow");

        assert_eq!(cache.get(&"apple"), Some("red"));
        assert_eq!(cache.get(&"banana"), Some("yellow"));
        assert_eq!(cache.get(&"pear"), None);
    }

    #[test]
    fn test_eviction_under_pressure() {
        let cache: Cache<u32, u32> = Cache::new(3, None);
        for i in 0..50 {
            cache.insert(i, i);
        }
        assert!(cache.len() <= 3, "cache grew past capacity: {}", cache.len());
        // Recent entries survive.
        assert_eq!(cache.get(&49), Some(49));
    }

    #[test]
    fn test_eviction_callback_fires() {
        struct Recorder(StdMutex<Vec<(u32, u32)>>);
        impl EvictionCallback<u32, u32> for Recorder {
            fn evicted_entry(&self, key: &u32, value: &u32) {
                self.0.lock().unwrap().push((*key, *value));
            }
        }

        let recorder = Arc::new(Recorder(StdMutex::new(Vec::new())));
        let cache: Cache<u32, u32> = Cache::new(2, Some(recorder.clone()));
        cache.insert(1, 10);
        cache.insert(2, 20);
        cache.insert(3, 30); // must evict something

        let evicted = recorder.0.lock().unwrap();
        assert!(!evicted.is_empty());
        assert!(evicted.iter().all(|(k, v)| *v == k * 10));
    }

    #[test]
    fn test_hit_miss_stats() {
        let cache: Cache<u32, u32> = Cache::new(10, None);
        for i in 0..5 {
            cache.insert(i, i);
        }
        for i in 0..5 {
            assert_eq!(cache.get(&i), Some(i));
        }
        cache.get(&99);

        let (hits, misses) = cache.stats();
        assert_eq!(hits, 5);
        assert_eq!(misses, 1);
    }

    #[test]
    fn test_ghost_readmission_goes_to_main() {
        let cache: Cache<u32, u32> = Cache::new(3, None);
        cache.insert(1, 1);
        // Push enough entries through to evict key 1 into the ghost list.
        for i in 2..10 {
            cache.insert(i, i);
        }
        assert_eq!(cache.get(&1), None);
        // Reinsertion after ghost hit should stick.
        cache.insert(1, 1);
        assert_eq!(cache.get(&1), Some(1));
    }
}
