//! Defines the capabilities used by a group to talk to other peers.
//!
//! A [Group](crate::group::Group) has no idea how peers are selected or reached. It only asks
//! a [PeerPicker] which peer owns a key and then uses the returned [PeerFetcher] to obtain the
//! value. The default implementation of both is provided by the [http](crate::http) module, but
//! tests (or other transports) can plug in their own.
use std::sync::Arc;

use async_trait::async_trait;

/// Selects the peer which owns a given key.
pub trait PeerPicker: Send + Sync {
    /// Returns a fetcher for the owner of the given key.
    ///
    /// Returns **None** if the key is owned by the local node (or if no peers are known), in
    /// which case the group loads the value itself.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerFetcher>>;
}

/// Fetches a value of a group from a remote peer.
#[async_trait]
pub trait PeerFetcher: Send + Sync {
    /// Returns the raw bytes of the given key within the given group as computed by the peer.
    async fn fetch(&self, group: &str, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Never selects a remote peer so that every key is loaded locally.
///
/// # Examples
///
/// ```
/// # use saturn::peers::{NoPeers, PeerPicker};
/// assert_eq!(NoPeers.pick_peer("Tom").is_none(), true);
/// ```
pub struct NoPeers;

impl PeerPicker for NoPeers {
    fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerFetcher>> {
        None
    }
}
