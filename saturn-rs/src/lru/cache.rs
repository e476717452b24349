//! Provides a synchronized, lazily allocated LRU cache for [ByteView] values.
//!
//! Each [Group](crate::group::Group) owns one of these. All operations are guarded by a single
//! mutex which is only ever held for the duration of one lookup or insert. The underlying
//! [LRUStore] is created on the first insert, so that declaring a group with a large budget
//! doesn't allocate anything until data arrives.
use std::sync::Mutex;

use crate::lru::LRUStore;
use crate::view::ByteView;

/// Represents a thread safe LRU cache for byte views.
///
/// # Examples
/// ```
/// # use saturn::lru::Cache;
/// # use saturn::view::ByteView;
/// let cache = Cache::new(2048);
///
/// // Nothing has been allocated yet...
/// assert_eq!(cache.get("Tom"), None);
/// assert_eq!(cache.stats().allocated, false);
///
/// cache.add("Tom", ByteView::from("630"));
/// assert_eq!(cache.get("Tom").unwrap().as_string(), "630");
/// assert_eq!(cache.stats().used_bytes, 6);
/// ```
pub struct Cache {
    max_bytes: usize,
    store: Mutex<Option<LRUStore<ByteView>>>,
}

/// Provides a snapshot of the metrics of a [Cache].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheStats {
    /// Determines if the underlying store has been created at all.
    pub allocated: bool,

    /// Contains the number of entries.
    pub entries: usize,

    /// Contains the number of bytes occupied by keys and values.
    pub used_bytes: usize,

    /// Contains the configured limit in bytes (0 = unbounded).
    pub max_bytes: usize,

    /// Contains the number of lookups.
    pub reads: usize,

    /// Contains the number of lookups which found a value.
    pub hits: usize,

    /// Contains the number of entries evicted due to the size limit.
    pub evictions: usize,
}

impl Cache {
    /// Creates a new cache which will keep at most **max_bytes** of data (0 = unbounded).
    pub fn new(max_bytes: usize) -> Self {
        Cache {
            max_bytes,
            store: Mutex::new(None),
        }
    }

    /// Stores the given value, creating the underlying store if necessary.
    pub fn add(&self, key: &str, value: ByteView) {
        let mut store = self.store.lock().unwrap();
        store
            .get_or_insert_with(|| LRUStore::new(self.max_bytes))
            .add(key.to_owned(), value);
    }

    /// Returns the value stored for the given key.
    ///
    /// The returned view shares the (immutable) buffer with the cache entry.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.store
            .lock()
            .unwrap()
            .as_mut()
            .and_then(|store| store.get(key).cloned())
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().as_ref().map_or(0, |store| store.len())
    }

    /// Determines if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of the current metrics.
    pub fn stats(&self) -> CacheStats {
        match self.store.lock().unwrap().as_ref() {
            Some(store) => CacheStats {
                allocated: true,
                entries: store.len(),
                used_bytes: store.used_bytes(),
                max_bytes: self.max_bytes,
                reads: store.reads(),
                hits: store.hits(),
                evictions: store.evictions(),
            },
            None => CacheStats {
                max_bytes: self.max_bytes,
                ..CacheStats::default()
            },
        }
    }
}
