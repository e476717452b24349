//! Contains the HTTP server which answers requests of other peers.
//!
//! Opens a server socket on the specified port (**server.port** in the config or 8001 as
//! fallback) and binds it to the selected IP (**server.host** in the config or 0.0.0.0 as
//! fallback). Each request is dispatched to the groups of the [Registry] via
//! [handle](crate::http::handle).
//!
//! Just like the rest of the framework, the server tries to avoid restarts at any cost, as these
//! would wipe all cached data. If the socket cannot be bound (e.g. as an old instance is still
//! bleeding out), binding is retried every 500ms. Also, if the address in the config changes, the
//! server gracefully shuts down and re-binds to the new address.
//!
//! # Example
//!
//! ```no_run
//! use saturn::builder::Builder;
//! use saturn::config::Config;
//! use saturn::http::HttpServer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Use a different port than a production instance...
//!     platform.require::<Config>().load_from_string("
//!         server:
//!             port: 1503
//!     ", None).unwrap();
//!
//!     platform.require::<HttpServer>().event_loop().await;
//! }
//! ```
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hyper::server::conn::AddrIncoming;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::http::api::{handle_api, DEFAULT_API_PORT};
use crate::http::{base_path, handle, DEFAULT_BASE_PATH};
use crate::platform::Platform;
use crate::registry::Registry;
use crate::spawn;

/// Specifies the interval in which a running server checks if it has to shut down.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Specifies the delay between two attempts to bind the server socket.
const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Determines which requests a server answers and where it finds its settings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Endpoint {
    /// Serves values to other peers (config section **server**).
    Peers,

    /// Serves values to end users (config section **api**).
    Api,
}

impl Endpoint {
    fn section(self) -> &'static str {
        match self {
            Endpoint::Peers => "server",
            Endpoint::Api => "api",
        }
    }

    fn default_port(self) -> i64 {
        match self {
            Endpoint::Peers => 8001,
            Endpoint::Api => DEFAULT_API_PORT,
        }
    }
}

/// Determines how requests are dispatched once a socket is open.
enum Route {
    Peers(String),
    Api(Option<String>),
}

/// Represents the HTTP server of a node.
pub struct HttpServer {
    endpoint: Endpoint,
    running: AtomicBool,
    current_address: Mutex<Option<String>>,
    platform: Arc<Platform>,
}

impl HttpServer {
    /// Creates and installs an **HttpServer** into the given **Platform**.
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder) unless disabled.
    /// Also note, that this will not start the server. This has to be done manually via
    /// [event_loop](HttpServer::event_loop) as it is most probably done in the main thread.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let server = Arc::new(HttpServer::new(platform, Endpoint::Peers));
        platform.register::<HttpServer>(server.clone());

        server
    }

    pub(crate) fn new(platform: &Arc<Platform>, endpoint: Endpoint) -> Self {
        HttpServer {
            endpoint,
            running: AtomicBool::new(false),
            current_address: Mutex::new(None),
            platform: platform.clone(),
        }
    }

    /// Determines if the server should keep its socket open.
    ///
    /// This is toggled to false once the configured address changes, so that the
    /// **event_loop** re-binds the socket.
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns the address the server socket is currently bound to.
    pub fn current_address(&self) -> Option<String> {
        self.current_address.lock().unwrap().clone()
    }

    /// Determines the server address based on the current configuration.
    fn address(&self) -> String {
        let section = self.endpoint.section();
        let default_port = self.endpoint.default_port();

        self.platform
            .find::<Config>()
            .map(|config| {
                let handle = config.current();
                format!(
                    "{}:{}",
                    handle
                        .query(format!("{}.host", section))
                        .as_str()
                        .unwrap_or("0.0.0.0"),
                    handle
                        .query(format!("{}.port", section))
                        .as_i64()
                        .filter(|port| port > &0 && port <= &(u16::MAX as i64))
                        .unwrap_or(default_port)
                )
            })
            .unwrap_or_else(|| format!("0.0.0.0:{}", default_port))
    }

    fn route(&self) -> Route {
        match self.endpoint {
            Endpoint::Peers => Route::Peers(self.base_path()),
            Endpoint::Api => Route::Api(self.platform.find::<Config>().and_then(|config| {
                config
                    .current()
                    .query("api.group")
                    .as_str()
                    .map(|group| group.to_owned())
            })),
        }
    }

    /// Determines the base path under which groups are served.
    fn base_path(&self) -> String {
        match self.platform.find::<Config>() {
            Some(config) => base_path(&config.current()).unwrap_or_else(|error| {
                log::error!("{:#} Using {} instead.", error, DEFAULT_BASE_PATH);
                DEFAULT_BASE_PATH.to_owned()
            }),
            None => DEFAULT_BASE_PATH.to_owned(),
        }
    }

    /// Starts the event loop in a separate task.
    ///
    /// This is most probably used by test scenarios where the tests itself run in the main thread.
    pub fn fork(server: &Arc<HttpServer>) {
        let cloned_server = server.clone();
        spawn!(async move {
            cloned_server.event_loop().await;
        });
    }

    /// Starts the event loop in a separate task and waits until the socket has been bound.
    ///
    /// Just like **fork** this is intended to be used in test environments.
    pub async fn fork_and_await(server: &Arc<HttpServer>) {
        HttpServer::fork(server);

        while server.current_address().is_none() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Tries to open a server socket on the specified address and serves incoming requests.
    ///
    /// This only returns once the platform has been terminated. If the address in the config
    /// changes, the server is shut down and re-bound to the new address.
    pub async fn event_loop(&self) {
        let mut address = String::new();
        let mut last_bind_error_reported = Instant::now();

        while self.platform.is_running() {
            if !self.is_running() {
                address = self.address();
                self.running.store(true, Ordering::Release);
            }

            match bind(&address).await {
                Ok(incoming) => {
                    log::info!("Opened server socket on {}...", &address);
                    *self.current_address.lock().unwrap() = Some(address.clone());
                    self.serve(incoming).await;
                    log::info!("Closing server socket on {}.", &address);
                }
                Err(error) => {
                    // Report at most every 5s, as we retry every 500ms...
                    if last_bind_error_reported.elapsed().as_secs() > 5 {
                        log::error!(
                            "Cannot open server address {}: {:#}. Retrying every 500ms...",
                            &address,
                            error
                        );
                        last_bind_error_reported = Instant::now();
                    }
                    tokio::time::sleep(BIND_RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn serve(&self, incoming: AddrIncoming) {
        let registry = self.platform.require::<Registry>();
        let route = Arc::new(self.route());

        let make_service = make_service_fn(move |_connection| {
            let registry = registry.clone();
            let route = route.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    let registry = registry.clone();
                    let route = route.clone();
                    async move {
                        let response = match route.as_ref() {
                            Route::Peers(base_path) => handle(&registry, base_path, request).await,
                            Route::Api(group) => {
                                handle_api(&registry, group.as_deref(), request).await
                            }
                        };

                        Ok::<_, Infallible>(response)
                    }
                }))
            }
        });

        let server = Server::builder(incoming)
            .serve(make_service)
            .with_graceful_shutdown(self.await_shutdown());

        if let Err(error) = server.await {
            log::error!("The HTTP server failed: {}", error);
        }
    }

    /// Completes once either the platform is terminated or the configured address changed.
    async fn await_shutdown(&self) {
        let mut config_changed = self.platform.find::<Config>().map(|config| config.notifier());

        while self.platform.is_running() && self.is_running() {
            match config_changed.as_mut() {
                Some(notifier) => tokio::select! {
                    _ = tokio::time::sleep(SHUTDOWN_POLL_INTERVAL) => (),
                    _ = notifier.recv() => self.check_address(),
                },
                None => tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await,
            }
        }
    }

    fn check_address(&self) {
        let new_address = self.address();
        if let Some(current_address) = &*self.current_address.lock().unwrap() {
            if current_address != &new_address {
                log::info!("Server address has changed. Restarting server socket...");

                // Force the event_loop to re-evaluate the expected server address...
                self.running.store(false, Ordering::Release);
            }
        }
    }
}

async fn bind(address: &str) -> anyhow::Result<AddrIncoming> {
    let listener = TcpListener::bind(address).await?;
    let mut incoming = AddrIncoming::from_listener(listener)?;
    let _ = incoming.set_nodelay(true);

    Ok(incoming)
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::config::Config;
    use crate::group::{GetterFn, Group};
    use crate::http::{HttpFetcher, HttpPool, HttpServer};
    use crate::peers::PeerFetcher;
    use crate::registry::Registry;
    use crate::testing::{test_async, SHARED_TEST_RESOURCES};
    use hyper::{Client, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn integration_test() {
        // We want exclusive access to the 1503 port on which we fire up a test-server...
        log::info!("Acquiring shared resources...");
        let _guard = SHARED_TEST_RESOURCES.lock().unwrap();
        log::info!("Successfully acquired shared resources.");

        test_async(async {
            let platform = Builder::new()
                .enable_config()
                .enable_registry()
                .enable_server()
                .build()
                .await;
            platform
                .require::<Config>()
                .load_from_string(
                    "
server:
    host: 127.0.0.1
    port: 1503
",
                    None,
                )
                .unwrap();

            let _ = platform
                .require::<Registry>()
                .new_group(
                    "scores",
                    2048,
                    GetterFn::new(|key: &str| match key {
                        "Tom" => Ok(b"630".to_vec()),
                        "Sam" => Ok(b"567".to_vec()),
                        _ => Err(anyhow::anyhow!("{} not exist", key)),
                    }),
                )
                .unwrap();

            HttpServer::fork_and_await(&platform.require::<HttpServer>()).await;
            let fetcher =
                HttpFetcher::new("http://127.0.0.1:1503", "/_saturn/", Duration::from_secs(5));

            // Values are served...
            assert_eq!(fetcher.fetch("scores", "Tom").await.unwrap(), b"630");

            // ...and errors are reported using their status code.
            assert_eq!(
                fetcher
                    .fetch("scores", "Unknown")
                    .await
                    .unwrap_err()
                    .to_string(),
                "server returned: 500 Internal Server Error"
            );
            assert_eq!(
                fetcher
                    .fetch("unknown", "Tom")
                    .await
                    .unwrap_err()
                    .to_string(),
                "server returned: 404 Not Found"
            );

            // A remote group on another node fetches each key it doesn't own from our server...
            let pool = HttpPool::new("http://127.0.0.2:1503", "/_saturn/", 50);
            pool.set(&["http://127.0.0.1:1503"]);
            let remote_group = Group::new(
                "scores",
                2048,
                GetterFn::new(|_: &str| Err(anyhow::anyhow!("Not owned by this node"))),
            );
            remote_group.register_peers(Arc::new(pool)).unwrap();

            assert_eq!(remote_group.get("Sam").await.unwrap().as_string(), "567");
            assert_eq!(remote_group.stats().peer_loads, 1);
            assert_eq!(remote_group.stats().cache.entries, 0);

            // The owning node has cached the value...
            let stats = platform
                .require::<Registry>()
                .get_group("scores")
                .unwrap()
                .stats();
            assert_eq!(stats.cache.entries, 2);

            // The stats are reported as JSON...
            let response = Client::new()
                .get("http://127.0.0.1:1503/_saturn/".parse().unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["groups"][0]["name"], "scores");

            platform.terminate();
        });
    }

    #[test]
    fn unreachable_peers_are_reported_as_errors() {
        test_async(async {
            let fetcher =
                HttpFetcher::new("http://127.0.0.1:1", "/_saturn/", Duration::from_secs(2));
            assert_eq!(fetcher.fetch("scores", "Tom").await.is_err(), true);
        });
    }
}
