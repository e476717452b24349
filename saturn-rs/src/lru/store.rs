use linked_hash_map::LinkedHashMap;

/// Returns the allocated memory in bytes.
pub trait ByteSize {
    /// Returns the amount of memory in bytes which is accounted for this value.
    ///
    /// This is most probably an approximation. It should however represent the "largest" part
    /// of a value, e.g. the payload on the heap.
    fn allocated_size(&self) -> usize;
}

impl ByteSize for String {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for Vec<u8> {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

/// Describes a callback which is invoked for each entry which is evicted to make room.
pub type EvictionCallback<V> = Box<dyn FnMut(&str, &V) + Send>;

/// Provides a size constrained LRU store.
///
/// A store behaves just like a **Map** as long as there is enough room left. Once the sum of
/// all keys and values exceeds **max_bytes**, the least recently used entries are evicted until
/// the store fits again. A **max_bytes** of zero disables this limit entirely.
///
/// Note that this store isn't synchronized at all. Use [Cache](crate::lru::Cache) to share it
/// between tasks.
///
/// # Examples
/// ```
/// # use saturn::lru::LRUStore;
/// // Specifies a store which permits 16 bytes of keys and values..
/// let mut lru = LRUStore::new(16);
///
/// lru.add("Foo".to_owned(), "Bar".to_owned());
/// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
///
/// // this will still fit..
/// lru.add("Foo1".to_owned(), "X".repeat(6));
/// assert_eq!(lru.used_bytes(), 16);
///
/// // this will hit the limit and throw out the least recently used entry...
/// lru.add("Foo2".to_owned(), "Y".to_owned());
/// assert_eq!(lru.get("Foo").is_some(), false);
/// assert_eq!(lru.get("Foo1").is_some(), true);
/// assert_eq!(lru.get("Foo2").is_some(), true);
/// ```
pub struct LRUStore<V: ByteSize> {
    max_bytes: usize,
    used_bytes: usize,
    reads: usize,
    hits: usize,
    writes: usize,
    evictions: usize,
    map: LinkedHashMap<String, Entry<V>>,
    on_evicted: Option<EvictionCallback<V>>,
}

struct Entry<V: ByteSize> {
    mem_size: usize,
    value: V,
}

impl<V: ByteSize> LRUStore<V> {
    /// Creates a new store which keeps at most **max_bytes** of keys and values.
    pub fn new(max_bytes: usize) -> Self {
        LRUStore {
            max_bytes,
            used_bytes: 0,
            reads: 0,
            hits: 0,
            writes: 0,
            evictions: 0,
            map: LinkedHashMap::new(),
            on_evicted: None,
        }
    }

    /// Creates a new store which notifies the given callback for each evicted entry.
    ///
    /// # Examples
    /// ```
    /// # use saturn::lru::LRUStore;
    /// # use std::sync::{Arc, Mutex};
    /// let evicted = Arc::new(Mutex::new(Vec::new()));
    /// let log = evicted.clone();
    /// let mut lru: LRUStore<String> = LRUStore::with_eviction_callback(
    ///     8,
    ///     Box::new(move |key: &str, _: &String| log.lock().unwrap().push(key.to_owned())),
    /// );
    ///
    /// lru.add("A".to_owned(), "123".to_owned());
    /// lru.add("B".to_owned(), "123".to_owned());
    /// lru.add("C".to_owned(), "123".to_owned());
    ///
    /// assert_eq!(*evicted.lock().unwrap(), vec!["A".to_owned()]);
    /// ```
    pub fn with_eviction_callback(max_bytes: usize, callback: EvictionCallback<V>) -> Self {
        let mut store = LRUStore::new(max_bytes);
        store.on_evicted = Some(callback);
        store
    }

    /// Stores the given value for the given key.
    ///
    /// If the key is already present, its value is replaced and the entry counts as recently
    /// used. Afterwards, least recently used entries are evicted until the limit is met again.
    /// Note that an entry which is larger than the whole store will be evicted right away.
    pub fn add(&mut self, key: String, value: V) {
        let entry = Entry {
            mem_size: key.len() + value.allocated_size(),
            value,
        };
        let mem_size = entry.mem_size;

        if let Some(previous) = self.map.insert(key, entry) {
            self.used_bytes -= previous.mem_size;
        }

        self.writes += 1;
        self.used_bytes += mem_size;

        self.enforce_constraints();
    }

    fn enforce_constraints(&mut self) {
        while self.max_bytes != 0 && self.used_bytes > self.max_bytes {
            if self.remove_oldest().is_none() {
                break;
            }
        }
    }

    /// Returns the value stored for the given key and marks it as most recently used.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.reads += 1;

        match self.map.get_refresh(key) {
            Some(entry) => {
                self.hits += 1;
                Some(&entry.value)
            }
            None => None,
        }
    }

    /// Evicts the least recently used entry.
    ///
    /// Returns the evicted entry or **None** if the store was empty. The eviction callback (if
    /// present) is invoked before the entry is handed back.
    pub fn remove_oldest(&mut self) -> Option<(String, V)> {
        let (key, entry) = self.map.pop_front()?;
        self.used_bytes -= entry.mem_size;
        self.evictions += 1;

        if let Some(callback) = self.on_evicted.as_mut() {
            callback(&key, &entry.value);
        }

        Some((key, entry.value))
    }

    /// Removes the entry for the given key if present.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let entry = self.map.remove(key)?;
        self.writes += 1;
        self.used_bytes -= entry.mem_size;

        Some(entry.value)
    }

    /// Returns the number of entries in the store.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the store is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the amount of bytes occupied by all keys and values.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Returns the limit of this store in bytes (0 means unbounded).
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Returns the memory utilization in percent.
    ///
    /// An unbounded store always reports 0%.
    pub fn memory_utilization(&self) -> f32 {
        match self.max_bytes {
            0 => 0.,
            max => self.used_bytes as f32 / max as f32 * 100.,
        }
    }

    /// Returns the hit rate in percent.
    pub fn hit_rate(&self) -> f32 {
        match self.reads {
            0 => 0.,
            n => self.hits as f32 / n as f32 * 100.,
        }
    }

    /// Returns the total number of lookups performed on this store.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Returns the number of lookups which found a value.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Returns the total number of writes (adds and removals).
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Returns the number of entries which were evicted to make room.
    pub fn evictions(&self) -> usize {
        self.evictions
    }
}
