//! Selects the owner of a key among all peers and fetches values via HTTP.
//!
//! The pool keeps a [HashRing] of all peers (including the local node) along with one
//! [HttpFetcher] per peer. As all keys owned by the local node are loaded locally, the pool
//! never hands out a fetcher for itself.
//!
//! When installed via [HttpPool::install], the list of peers is read from the config and
//! re-read once the config changes. Therefore nodes can be added or removed without restarting
//! the cluster. Note that each change of membership rebuilds the ring from scratch.
//!
//! # Examples
//!
//! ```
//! # use saturn::http::HttpPool;
//! # use saturn::peers::PeerPicker;
//! let pool = HttpPool::new("http://node-a:8001", "/_saturn/", 50);
//! assert_eq!(pool.pick_peer("Tom").is_none(), true);
//!
//! pool.set(&["http://node-a:8001", "http://node-b:8001", "http://node-c:8001"]);
//! assert_eq!(pool.peers().len(), 3);
//! ```
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, StatusCode, Uri};
use yaml_rust::Yaml;

use crate::config::{Config, Handle};
use crate::fmt::duration_setting;
use crate::peers::{PeerFetcher, PeerPicker};
use crate::platform::Platform;
use crate::ring::{HashRing, DEFAULT_REPLICAS};
use crate::spawn;

/// Contains the timeout applied to requests if none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Specifies how often the config watcher checks if the platform is still running.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Fetches values from a single remote peer.
pub struct HttpFetcher {
    base_url: String,
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl HttpFetcher {
    /// Creates a fetcher for the peer reachable at the given URL (e.g. "http://node-b:8001").
    pub fn new(peer: &str, base_path: &str, timeout: Duration) -> Self {
        HttpFetcher::with_client(Client::new(), peer, base_path, timeout)
    }

    fn with_client(
        client: Client<HttpConnector, Body>,
        peer: &str,
        base_path: &str,
        timeout: Duration,
    ) -> Self {
        HttpFetcher {
            base_url: format!("{}{}", peer, base_path),
            client,
            timeout,
        }
    }

    async fn request(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let uri = url.parse::<Uri>().context("Invalid uri")?;
        let response = self
            .client
            .get(uri)
            .await
            .with_context(|| format!("Failed to request {}", url))?;

        if response.status() != StatusCode::OK {
            return Err(anyhow::anyhow!("server returned: {}", response.status()));
        }

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|error| anyhow::anyhow!("reading response body: {}", error))?;

        Ok(body.to_vec())
    }
}

#[async_trait]
impl PeerFetcher for HttpFetcher {
    async fn fetch(&self, group: &str, key: &str) -> anyhow::Result<Vec<u8>> {
        let url = format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(group),
            urlencoding::encode(key)
        );

        match tokio::time::timeout(self.timeout, self.request(&url)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "request to {} timed out after {:?}",
                url,
                self.timeout
            )),
        }
    }
}

struct Members {
    ring: HashRing,
    fetchers: HashMap<String, Arc<HttpFetcher>>,
    peers: Vec<String>,
}

/// Represents the set of all peers of the cluster, as seen by the local node.
pub struct HttpPool {
    self_url: String,
    base_path: String,
    replicas: usize,
    timeout: Duration,
    client: Client<HttpConnector, Body>,
    members: Mutex<Members>,
}

/// Contains the pool related settings of the config.
struct PoolSettings {
    self_url: String,
    base_path: String,
    replicas: usize,
    timeout: Duration,
    nodes: Vec<String>,
}

impl PoolSettings {
    fn read(handle: &Handle) -> anyhow::Result<PoolSettings> {
        let replicas = match handle.query("peers.replicas") {
            Yaml::Integer(replicas) if *replicas > 0 => *replicas as usize,
            Yaml::Null | Yaml::BadValue => DEFAULT_REPLICAS,
            other => {
                return Err(anyhow::anyhow!(
                    "'peers.replicas' has to be a positive number but {:?} was given.",
                    other
                ))
            }
        };

        let nodes = match handle.query("peers.nodes") {
            Yaml::Array(nodes) => nodes
                .iter()
                .map(|node| {
                    node.as_str().map(|node| node.to_owned()).ok_or_else(|| {
                        anyhow::anyhow!("'peers.nodes' contains an invalid entry: {:?}", node)
                    })
                })
                .collect::<anyhow::Result<Vec<String>>>()?,
            Yaml::Null | Yaml::BadValue => Vec::new(),
            other => {
                return Err(anyhow::anyhow!(
                    "'peers.nodes' has to be a list of URLs but {:?} was given.",
                    other
                ))
            }
        };

        Ok(PoolSettings {
            self_url: handle
                .query("peers.self")
                .as_str()
                .unwrap_or("http://localhost:8001")
                .to_owned(),
            base_path: super::base_path(handle)?,
            replicas,
            timeout: duration_setting(handle.query("peers.timeout"), DEFAULT_TIMEOUT)
                .context("Invalid 'peers.timeout'")?,
            nodes,
        })
    }
}

impl HttpPool {
    /// Creates a new pool for the node reachable at **self_url**.
    ///
    /// The pool starts without any peers, so that all keys are considered to be owned locally
    /// until [HttpPool::set] is invoked.
    pub fn new(self_url: &str, base_path: &str, replicas: usize) -> Self {
        HttpPool {
            self_url: self_url.to_owned(),
            base_path: base_path.to_owned(),
            replicas,
            timeout: DEFAULT_TIMEOUT,
            client: Client::new(),
            members: Mutex::new(Members {
                ring: HashRing::new(replicas, None),
                fetchers: HashMap::new(),
                peers: Vec::new(),
            }),
        }
    }

    /// Specifies the timeout applied to each request sent to a peer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Creates and installs a pool based on the current config.
    ///
    /// This reads **peers.self**, **peers.base_path**, **peers.replicas**, **peers.timeout** and
    /// **peers.nodes**. Once the config changes, the list of nodes is re-read and the ring is
    /// rebuilt. Note that all other settings can only be changed by restarting the node.
    ///
    /// Fails if the config contains invalid values.
    pub fn install(platform: &Arc<Platform>) -> anyhow::Result<Arc<Self>> {
        let config = platform
            .find::<Config>()
            .context("A config is required to set up the pool of peers.")?;
        let settings = PoolSettings::read(&config.current())?;

        let pool = Arc::new(
            HttpPool::new(&settings.self_url, &settings.base_path, settings.replicas)
                .with_timeout(settings.timeout),
        );
        pool.set(&settings.nodes);
        log::info!(
            "Running as {} with {} peer(s) and {} replica(s) per peer.",
            pool.self_url,
            settings.nodes.len(),
            pool.replicas()
        );

        platform.register::<HttpPool>(pool.clone());
        HttpPool::watch_config(platform.clone(), config, pool.clone());

        Ok(pool)
    }

    fn watch_config(platform: Arc<Platform>, config: Arc<Config>, pool: Arc<HttpPool>) {
        let mut notifier = config.notifier();
        spawn!(async move {
            while platform.is_running() {
                match tokio::time::timeout(SHUTDOWN_POLL_INTERVAL, notifier.recv()).await {
                    Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => return,
                    Ok(_) => pool.reload(&config.current()),
                    Err(_) => (),
                }
            }
        });
    }

    fn reload(&self, handle: &Handle) {
        match PoolSettings::read(handle) {
            Ok(settings) => {
                if settings.self_url != self.self_url
                    || settings.base_path != self.base_path
                    || settings.replicas != self.replicas
                    || settings.timeout != self.timeout
                {
                    log::warn!("Only changes of 'peers.nodes' are applied without a restart.");
                }

                if settings.nodes != self.peers() {
                    log::info!("Peers have changed. Rebuilding the ring...");
                    self.set(&settings.nodes);
                }
            }
            Err(error) => log::error!("Ignoring invalid peer settings: {:#}", error),
        }
    }

    /// Replaces the set of peers.
    ///
    /// The given list should contain the local node itself. The ring is rebuilt from scratch.
    pub fn set<S: AsRef<str>>(&self, peers: &[S]) {
        let mut ring = HashRing::new(self.replicas, None);
        ring.add(peers);

        let fetchers = peers
            .iter()
            .map(|peer| {
                let peer = peer.as_ref();
                (
                    peer.to_owned(),
                    Arc::new(HttpFetcher::with_client(
                        self.client.clone(),
                        peer,
                        &self.base_path,
                        self.timeout,
                    )),
                )
            })
            .collect();

        *self.members.lock().unwrap() = Members {
            ring,
            fetchers,
            peers: peers.iter().map(|peer| peer.as_ref().to_owned()).collect(),
        };
    }

    /// Returns the URLs of all known peers.
    pub fn peers(&self) -> Vec<String> {
        self.members.lock().unwrap().peers.clone()
    }

    /// Returns the number of virtual nodes placed on the ring for each peer.
    pub fn replicas(&self) -> usize {
        self.members.lock().unwrap().ring.replicas()
    }

    /// Returns the URL of the local node.
    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    /// Returns the base path shared by all peers.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerFetcher>> {
        let members = self.members.lock().unwrap();
        let peer = members.ring.get(key)?;
        if peer == self.self_url {
            return None;
        }

        log::debug!("[{}] Picked peer {} for '{}'", self.self_url, peer, key);
        let fetcher: Arc<dyn PeerFetcher> = members.fetchers.get(peer)?.clone();

        Some(fetcher)
    }
}
