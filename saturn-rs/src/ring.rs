//! Provides a consistent hash ring which maps keys onto peers.
//!
//! Each peer is placed onto a circular hash space several times (once per **replica**). These
//! virtual nodes smooth out the distribution of keys, even if only a handful of peers are
//! present. A key is owned by the first virtual node whose hash is greater or equal to the hash
//! of the key. If there is no such node, we wrap around and pick the very first one.
//!
//! Lookups perform a binary search over the sorted hashes of all virtual nodes. Adding peers
//! re-sorts the whole ring, which is fine as the set of peers rarely changes compared to the
//! number of lookups.
//!
//! Note that a ring performs no locking at all. The owner (e.g. the
//! [HttpPool](crate::http::HttpPool)) has to serialize mutations and lookups.
//!
//! # Examples
//!
//! ```
//! # use saturn::ring::HashRing;
//! let mut ring = HashRing::new(50, None);
//! assert_eq!(ring.get("Tom"), None);
//!
//! ring.add(&["http://node-a:8001", "http://node-b:8001", "http://node-c:8001"]);
//! let owner = ring.get("Tom").unwrap().to_owned();
//!
//! // Lookups are deterministic...
//! assert_eq!(ring.get("Tom").unwrap(), owner);
//! assert_eq!(ring.len(), 150);
//! ```
use fnv::FnvHashMap;

/// Describes the hash function used to place peers and keys onto the ring.
pub type HashFn = Box<dyn Fn(&[u8]) -> u32 + Send + Sync>;

/// Contains the number of virtual nodes per peer used if no explicit value is configured.
pub const DEFAULT_REPLICAS: usize = 50;

/// Represents a consistent hash ring of peers.
pub struct HashRing {
    hash: HashFn,
    replicas: usize,
    hashes: Vec<u32>,
    peers: FnvHashMap<u32, String>,
}

impl HashRing {
    /// Creates a new and empty ring.
    ///
    /// Each peer will be represented by **replicas** virtual nodes. If no hash function is
    /// given, the IEEE CRC-32 checksum is used.
    pub fn new(replicas: usize, hash: Option<HashFn>) -> Self {
        let hash: HashFn = match hash {
            Some(hash) => hash,
            None => Box::new(crc32fast::hash),
        };

        HashRing {
            hash,
            replicas,
            hashes: Vec::new(),
            peers: FnvHashMap::default(),
        }
    }

    /// Adds the given peers to the ring.
    ///
    /// The virtual nodes of a peer are named by prefixing the peer id with the index of the
    /// replica ("0peer", "1peer", ...).
    ///
    /// Note that this isn't idempotent. Adding a peer twice will place another set of virtual
    /// nodes onto the ring. To change the set of peers, a new ring has to be built.
    pub fn add<S: AsRef<str>>(&mut self, peers: &[S]) {
        for peer in peers {
            let peer = peer.as_ref();
            for replica in 0..self.replicas {
                let hash = (self.hash)(format!("{}{}", replica, peer).as_bytes());
                self.hashes.push(hash);
                let _ = self.peers.insert(hash, peer.to_owned());
            }
        }

        self.hashes.sort_unstable();
    }

    /// Returns the peer which owns the given key.
    ///
    /// Returns **None** if the ring is empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.hashes.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let index = self.hashes.partition_point(|node| *node < hash) % self.hashes.len();

        self.peers
            .get(&self.hashes[index])
            .map(|peer| peer.as_str())
    }

    /// Returns the number of virtual nodes on the ring.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Determines if no peer has been added yet.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Returns the number of virtual nodes per peer.
    pub fn replicas(&self) -> usize {
        self.replicas
    }
}

#[cfg(test)]
mod tests {
    use crate::ring::HashRing;

    /// Uses the numeric value of the given data as hash, so that the placement is predictable.
    fn numeric_ring() -> HashRing {
        HashRing::new(
            3,
            Some(Box::new(|data: &[u8]| {
                std::str::from_utf8(data).unwrap().parse::<u32>().unwrap()
            })),
        )
    }

    #[test]
    fn keys_are_mapped_to_the_next_virtual_node() {
        let mut ring = numeric_ring();

        // This yields the virtual nodes 2, 4, 6, 12, 14, 16, 22, 24, 26...
        ring.add(&["6", "4", "2"]);
        assert_eq!(ring.len(), 9);

        assert_eq!(ring.get("2"), Some("2"));
        assert_eq!(ring.get("11"), Some("2"));
        assert_eq!(ring.get("23"), Some("4"));
        assert_eq!(ring.get("25"), Some("6"));

        // 27 is larger than any virtual node and therefore wraps around to "2"...
        assert_eq!(ring.get("27"), Some("2"));

        // Adding "8" yields 8, 18 and 28...
        ring.add(&["8"]);
        assert_eq!(ring.get("27"), Some("8"));
        assert_eq!(ring.get("2"), Some("2"));
        assert_eq!(ring.get("23"), Some("4"));
    }

    #[test]
    fn empty_rings_have_no_owner() {
        let ring = HashRing::new(50, None);
        assert_eq!(ring.is_empty(), true);
        assert_eq!(ring.get("Tom"), None);

        // A ring without replicas can never place a peer...
        let mut ring = HashRing::new(0, None);
        ring.add(&["http://localhost:8001"]);
        assert_eq!(ring.is_empty(), true);
        assert_eq!(ring.get("Tom"), None);
    }

    #[test]
    fn lookups_are_deterministic() {
        let peers = ["http://a:8001", "http://b:8001", "http://c:8001"];
        let mut ring = HashRing::new(50, None);
        ring.add(&peers);
        let mut other_ring = HashRing::new(50, None);
        other_ring.add(&peers);

        for i in 0..1000 {
            let key = format!("key-{}", i);
            let owner = ring.get(&key).unwrap();
            assert_eq!(peers.contains(&owner), true);
            assert_eq!(ring.get(&key), Some(owner));
            assert_eq!(other_ring.get(&key), Some(owner));
        }
    }

    #[test]
    fn adding_a_peer_only_moves_a_fraction_of_the_keys() {
        let mut ring = HashRing::new(50, None);
        ring.add(&["http://a:8001", "http://b:8001", "http://c:8001"]);
        let mut grown_ring = HashRing::new(50, None);
        grown_ring.add(&["http://a:8001", "http://b:8001", "http://c:8001", "http://d:8001"]);

        let num_keys = 10_000;
        let mut moved = 0;
        for i in 0..num_keys {
            let key = format!("key-{}", i);
            let before = ring.get(&key).unwrap();
            let after = grown_ring.get(&key).unwrap();
            if before != after {
                // A key may only move to the new peer, never between the existing ones...
                assert_eq!(after, "http://d:8001");
                moved += 1;
            }
        }

        // Ideally 1/4 of all keys move, we permit quite some tolerance here...
        let move_rate = moved as f64 / num_keys as f64;
        assert_eq!(move_rate > 0.05 && move_rate < 0.5, true, "{}", move_rate);
    }
}
