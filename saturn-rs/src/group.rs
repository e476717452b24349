//! Provides named cache namespaces which know how to load missing values.
//!
//! A [Group] combines a size bounded [Cache](crate::lru::Cache) with a [Getter] which computes
//! values for missing keys. If peers are registered via [Group::register_peers], each missing key
//! is first routed to its owning peer. Only if the key is owned locally (or no peers are present),
//! the getter is invoked and its result is stored in the local cache.
//!
//! Values obtained from a remote peer are intentionally **not** cached locally. The owning peer
//! keeps them, which prevents the same value from being duplicated across the whole cluster.
//!
//! Concurrent lookups for the same missing key are coalesced by a
//! [RequestCoalescer](crate::flight::RequestCoalescer), so that only a single load or fetch is
//! performed no matter how many callers ask for the key at once.
//!
//! # Examples
//!
//! ```
//! # use saturn::group::{GetterFn, Group};
//! # #[tokio::main]
//! # async fn main() {
//! let group = Group::new(
//!     "scores",
//!     2048,
//!     GetterFn::new(|key: &str| match key {
//!         "Tom" => Ok(b"630".to_vec()),
//!         _ => Err(anyhow::anyhow!("{} not exist", key)),
//!     }),
//! );
//!
//! assert_eq!(group.get("Tom").await.unwrap().as_string(), "630");
//! assert_eq!(group.get("Unknown").await.unwrap_err().to_string(), "Unknown not exist");
//! # }
//! ```
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::error::CacheError;
use crate::flight::RequestCoalescer;
use crate::lru::{Cache, CacheStats};
use crate::peers::PeerPicker;
use crate::view::ByteView;

/// Loads the value of a key from the underlying data source.
///
/// This is invoked once a key is neither in the local cache nor owned by a remote peer.
#[async_trait]
pub trait Getter: Send + Sync {
    /// Computes the raw bytes for the given key.
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapts a plain (synchronous) function to be used as [Getter].
pub struct GetterFn<F>(pub F);

impl<F> GetterFn<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    /// Wraps the given function.
    pub fn new(function: F) -> Self {
        GetterFn(function)
    }
}

#[async_trait]
impl<F> Getter for GetterFn<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.0)(key)
    }
}

/// Provides a snapshot of the metrics of a [Group].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupStats {
    /// Contains the number of lookups (with a valid key).
    pub gets: usize,

    /// Contains the number of lookups served by the local cache.
    pub cache_hits: usize,

    /// Contains the number of lookups which missed the cache.
    pub loads: usize,

    /// Contains the number of lookups which waited for a load performed by another caller.
    pub coalesced_waits: usize,

    /// Contains the number of values successfully fetched from remote peers.
    pub peer_loads: usize,

    /// Contains the number of failed remote fetches.
    pub peer_errors: usize,

    /// Contains the number of values successfully computed by the getter.
    pub local_loads: usize,

    /// Contains the number of failed invocations of the getter.
    pub local_errors: usize,

    /// Contains the metrics of the local cache.
    pub cache: CacheStats,
}

#[derive(Default)]
struct Counters {
    gets: AtomicUsize,
    cache_hits: AtomicUsize,
    loads: AtomicUsize,
    coalesced_waits: AtomicUsize,
    peer_loads: AtomicUsize,
    peer_errors: AtomicUsize,
    local_loads: AtomicUsize,
    local_errors: AtomicUsize,
}

impl Counters {
    fn increment(counter: &AtomicUsize) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Represents a named cache namespace.
pub struct Group {
    shared: Arc<Shared>,
    loader: RequestCoalescer<Result<ByteView, CacheError>>,
}

/// Contains the parts of a group which are needed by an in-flight load.
///
/// Loads run in their own task (see [RequestCoalescer]), therefore they need shared ownership of
/// these.
struct Shared {
    name: String,
    getter: Arc<dyn Getter>,
    main_cache: Cache,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    counters: Counters,
}

impl Group {
    /// Creates a new group.
    ///
    /// Note that this doesn't register the group anywhere. Use
    /// [Registry::new_group](crate::registry::Registry::new_group) so that the group can be found
    /// by name (e.g. when serving requests of other peers).
    pub fn new(name: &str, max_bytes: usize, getter: impl Getter + 'static) -> Self {
        Group::with_getter(name, max_bytes, Arc::new(getter))
    }

    /// Creates a new group for an already shared getter.
    pub fn with_getter(name: &str, max_bytes: usize, getter: Arc<dyn Getter>) -> Self {
        Group {
            shared: Arc::new(Shared {
                name: name.to_owned(),
                getter,
                main_cache: Cache::new(max_bytes),
                peers: OnceLock::new(),
                counters: Counters::default(),
            }),
            loader: RequestCoalescer::new(),
        }
    }

    /// Returns the name of this group.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Installs the picker used to route missing keys to their owning peers.
    ///
    /// This can only be done once per group. Any further attempt yields a
    /// [CacheError::Configuration].
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) -> Result<(), CacheError> {
        self.shared.peers.set(peers).map_err(|_| {
            CacheError::Configuration(format!(
                "Peers have already been registered for group '{}'",
                self.shared.name
            ))
        })
    }

    /// Returns the value for the given key.
    ///
    /// The value is either served from the local cache, fetched from the owning peer or computed
    /// by the getter (in this order).
    ///
    /// Note that a load which has been started completes even if the caller stops waiting for it.
    /// Its result is still cached and handed to all other callers waiting for the same key.
    pub async fn get(&self, key: &str) -> Result<ByteView, CacheError> {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("key is required".to_owned()));
        }

        let counters = &self.shared.counters;
        Counters::increment(&counters.gets);
        if let Some(value) = self.shared.main_cache.get(key) {
            Counters::increment(&counters.cache_hits);
            log::debug!("[{}] Cache hit for '{}'", self.shared.name, key);
            return Ok(value);
        }

        self.load(key).await
    }

    async fn load(&self, key: &str) -> Result<ByteView, CacheError> {
        Counters::increment(&self.shared.counters.loads);

        let mut leading = false;
        let shared = self.shared.clone();
        let owned_key = key.to_owned();
        let result = self
            .loader
            .execute(key, || {
                leading = true;
                async move { shared.fetch_or_load(&owned_key).await }
            })
            .await;

        if !leading {
            Counters::increment(&self.shared.counters.coalesced_waits);
        }

        match result {
            Ok(result) => result,
            Err(abandoned) => Err(CacheError::load_failure(anyhow::Error::new(abandoned))),
        }
    }

    /// Returns a snapshot of the metrics of this group and its cache.
    pub fn stats(&self) -> GroupStats {
        let counters = &self.shared.counters;
        GroupStats {
            gets: counters.gets.load(Ordering::Relaxed),
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
            loads: counters.loads.load(Ordering::Relaxed),
            coalesced_waits: counters.coalesced_waits.load(Ordering::Relaxed),
            peer_loads: counters.peer_loads.load(Ordering::Relaxed),
            peer_errors: counters.peer_errors.load(Ordering::Relaxed),
            local_loads: counters.local_loads.load(Ordering::Relaxed),
            local_errors: counters.local_errors.load(Ordering::Relaxed),
            cache: self.shared.main_cache.stats(),
        }
    }
}

impl Shared {
    async fn fetch_or_load(&self, key: &str) -> Result<ByteView, CacheError> {
        let peer = self.peers.get().and_then(|peers| peers.pick_peer(key));
        match peer {
            Some(peer) => {
                log::debug!("[{}] Fetching '{}' from its owning peer", self.name, key);
                match peer.fetch(&self.name, key).await {
                    Ok(data) => {
                        Counters::increment(&self.counters.peer_loads);
                        Ok(ByteView::from(data))
                    }
                    Err(error) => {
                        Counters::increment(&self.counters.peer_errors);
                        log::debug!(
                            "[{}] Failed to fetch '{}' from peer: {:#}",
                            self.name,
                            key,
                            error
                        );
                        Err(CacheError::fetch_failure(error))
                    }
                }
            }
            None => self.load_locally(key).await,
        }
    }

    async fn load_locally(&self, key: &str) -> Result<ByteView, CacheError> {
        log::debug!("[{}] Loading '{}' locally", self.name, key);
        match self.getter.get(key).await {
            Ok(data) => {
                Counters::increment(&self.counters.local_loads);
                let value = ByteView::from(data);
                self.main_cache.add(key, value.clone());
                Ok(value)
            }
            Err(error) => {
                Counters::increment(&self.counters.local_errors);
                log::debug!("[{}] Failed to load '{}': {:#}", self.name, key, error);
                Err(CacheError::load_failure(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CacheError;
    use crate::group::{Getter, GetterFn, Group};
    use crate::peers::{NoPeers, PeerFetcher, PeerPicker};
    use crate::testing::test_async;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Provides a slow "database" which counts how often each key was requested.
    struct SlowDb {
        scores: HashMap<&'static str, &'static str>,
        requests: Arc<Mutex<HashMap<String, usize>>>,
    }

    impl SlowDb {
        fn new() -> (Self, Arc<Mutex<HashMap<String, usize>>>) {
            let requests = Arc::new(Mutex::new(HashMap::new()));
            let db = SlowDb {
                scores: [("Tom", "630"), ("Jack", "589"), ("Sam", "567")]
                    .into_iter()
                    .collect(),
                requests: requests.clone(),
            };

            (db, requests)
        }
    }

    #[async_trait]
    impl Getter for SlowDb {
        async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
            *self
                .requests
                .lock()
                .unwrap()
                .entry(key.to_owned())
                .or_insert(0) += 1;
            tokio::time::sleep(Duration::from_millis(20)).await;

            match self.scores.get(key) {
                Some(score) => Ok(score.as_bytes().to_vec()),
                None => Err(anyhow::anyhow!("{} not exist", key)),
            }
        }
    }

    fn requests_for(requests: &Mutex<HashMap<String, usize>>, key: &str) -> usize {
        requests.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Routes every key except "local" to a fake remote peer.
    struct FakePicker {
        fetcher: Arc<FakeFetcher>,
    }

    impl PeerPicker for FakePicker {
        fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerFetcher>> {
            if key == "local" {
                None
            } else {
                Some(self.fetcher.clone())
            }
        }
    }

    struct FakeFetcher {
        fetches: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PeerFetcher for FakeFetcher {
        async fn fetch(&self, group: &str, key: &str) -> anyhow::Result<Vec<u8>> {
            let _ = self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(anyhow::anyhow!("server returned: 500 Internal Server Error"))
            } else {
                Ok(format!("remote:{}:{}", group, key).into_bytes())
            }
        }
    }

    fn fake_peers(fail: bool) -> (Arc<FakePicker>, Arc<FakeFetcher>) {
        let fetcher = Arc::new(FakeFetcher {
            fetches: AtomicUsize::new(0),
            fail,
        });
        let picker = Arc::new(FakePicker {
            fetcher: fetcher.clone(),
        });

        (picker, fetcher)
    }

    #[test]
    fn values_are_loaded_once_and_then_cached() {
        test_async(async {
            let (db, requests) = SlowDb::new();
            let group = Group::new("scores", 2048, db);

            assert_eq!(group.get("Tom").await.unwrap().as_string(), "630");
            assert_eq!(group.get("Tom").await.unwrap().as_string(), "630");
            assert_eq!(requests_for(&requests, "Tom"), 1);

            let stats = group.stats();
            assert_eq!(stats.gets, 2);
            assert_eq!(stats.cache_hits, 1);
            assert_eq!(stats.loads, 1);
            assert_eq!(stats.local_loads, 1);
            assert_eq!(stats.cache.entries, 1);
        });
    }

    #[test]
    fn empty_keys_are_rejected() {
        test_async(async {
            let (db, requests) = SlowDb::new();
            let group = Group::new("scores", 2048, db);

            match group.get("").await {
                Err(CacheError::InvalidArgument(_)) => (),
                other => panic!("Unexpected result: {:?}", other),
            }
            assert_eq!(requests.lock().unwrap().is_empty(), true);
            assert_eq!(group.stats().gets, 0);
        });
    }

    #[test]
    fn failed_loads_are_reported_and_not_cached() {
        test_async(async {
            let (db, requests) = SlowDb::new();
            let group = Group::new("scores", 2048, db);

            for _ in 0..2 {
                match group.get("Unknown").await {
                    Err(error @ CacheError::LoadFailure(_)) => {
                        assert_eq!(error.to_string(), "Unknown not exist")
                    }
                    other => panic!("Unexpected result: {:?}", other),
                }
            }

            assert_eq!(requests_for(&requests, "Unknown"), 2);
            assert_eq!(group.stats().local_errors, 2);
            assert_eq!(group.stats().cache.entries, 0);
        });
    }

    #[test]
    fn concurrent_lookups_are_coalesced() {
        test_async(async {
            let (db, requests) = SlowDb::new();
            let group = Group::new("scores", 2048, db);

            let results = join_all((0..10).map(|_| group.get("Jack"))).await;
            for result in results {
                assert_eq!(result.unwrap().as_string(), "589");
            }
            assert_eq!(requests_for(&requests, "Jack"), 1);
            assert_eq!(group.stats().coalesced_waits, 9);

            // Errors are shared as well...
            let results = join_all((0..5).map(|_| group.get("Unknown"))).await;
            for result in results {
                assert_eq!(result.unwrap_err().to_string(), "Unknown not exist");
            }
            assert_eq!(requests_for(&requests, "Unknown"), 1);
        });
    }

    #[test]
    fn loads_complete_even_if_the_first_caller_gives_up() {
        test_async(async {
            let (db, requests) = SlowDb::new();
            let group = Group::new("scores", 2048, db);

            let (first, second) = tokio::join!(
                tokio::time::timeout(Duration::from_millis(5), group.get("Tom")),
                group.get("Tom"),
            );

            assert_eq!(first.is_err(), true);
            assert_eq!(second.unwrap().as_string(), "630");
            assert_eq!(requests_for(&requests, "Tom"), 1);
            assert_eq!(group.stats().cache.entries, 1);

            // The value has been cached although its initial caller went away...
            assert_eq!(group.get("Tom").await.unwrap().as_string(), "630");
            assert_eq!(requests_for(&requests, "Tom"), 1);
        });
    }

    #[test]
    fn remote_values_are_fetched_but_not_cached() {
        test_async(async {
            let (db, requests) = SlowDb::new();
            let group = Group::new("scores", 2048, db);
            let (picker, fetcher) = fake_peers(false);
            group.register_peers(picker).unwrap();

            assert_eq!(
                group.get("Tom").await.unwrap().as_string(),
                "remote:scores:Tom"
            );
            assert_eq!(
                group.get("Tom").await.unwrap().as_string(),
                "remote:scores:Tom"
            );
            assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 2);
            assert_eq!(requests_for(&requests, "Tom"), 0);
            assert_eq!(group.stats().cache.entries, 0);
            assert_eq!(group.stats().peer_loads, 2);

            // Keys owned by ourself are still loaded locally...
            assert_eq!(group.get("local").await.unwrap_err().to_string(), "local not exist");
            assert_eq!(requests_for(&requests, "local"), 1);
        });
    }

    #[test]
    fn failed_fetches_do_not_fall_back_to_the_getter() {
        test_async(async {
            let (db, requests) = SlowDb::new();
            let group = Group::new("scores", 2048, db);
            let (picker, fetcher) = fake_peers(true);
            group.register_peers(picker).unwrap();

            match group.get("Tom").await {
                Err(error @ CacheError::FetchFailure(_)) => assert_eq!(
                    error.to_string(),
                    "server returned: 500 Internal Server Error"
                ),
                other => panic!("Unexpected result: {:?}", other),
            }

            assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
            assert_eq!(requests_for(&requests, "Tom"), 0);
            assert_eq!(group.stats().peer_errors, 1);
        });
    }

    #[test]
    fn peers_can_only_be_registered_once() {
        let group = Group::new("scores", 0, GetterFn::new(|key: &str| Ok(key.as_bytes().to_vec())));
        assert_eq!(group.register_peers(Arc::new(NoPeers)).is_ok(), true);
        match group.register_peers(Arc::new(NoPeers)) {
            Err(CacheError::Configuration(_)) => (),
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn remote_owners_are_bypassed_when_no_peer_is_picked() {
        test_async(async {
            let group = Group::new(
                "echo",
                0,
                GetterFn::new(|key: &str| Ok(key.to_uppercase().into_bytes())),
            );
            group.register_peers(Arc::new(NoPeers)).unwrap();

            assert_eq!(group.get("sam").await.unwrap().as_string(), "SAM");
            assert_eq!(group.stats().local_loads, 1);
            assert_eq!(group.name(), "echo");
        });
    }
}
