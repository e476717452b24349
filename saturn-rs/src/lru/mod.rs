//! Provides a size constrained LRU cache.
//!
//! An LRU cache drops the least recently used entry once it is about to grow beyond its memory
//! budget. The budget is measured as the sum of the lengths of all keys and values, where the
//! size of a value is determined by the [ByteSize] trait.
//!
//! [LRUStore] is the plain, unsynchronized data structure which is built upon a linked hash map.
//! Therefore both, promoting an entry on access and evicting the oldest entry, are O(1)
//! operations.
//!
//! [Cache] wraps a store of [ByteView](crate::view::ByteView) values behind a mutex so that it
//! can be shared by all tasks serving a [Group](crate::group::Group).
mod cache;
mod store;

pub use cache::Cache;
pub use cache::CacheStats;
pub use store::ByteSize;
pub use store::EvictionCallback;
pub use store::LRUStore;
