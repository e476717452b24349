//! Provides an optional front-end which permits end users to query values.
//!
//! Other than the peer endpoint served by the [HttpServer], this serves a single resource:
//! `GET /api?key=<key>&group=<group>`. The group can be omitted if **api.group** is present in
//! the config. The value is looked up via [Group::get](crate::group::Group::get), therefore it is
//! either taken from the local cache, loaded locally or fetched from its owning peer.
//!
//! The API server is only started if the config contains an **api** section:
//! ```yaml
//! api:
//!     host: 0.0.0.0
//!     port: 9999
//!     group: scores
//! ```
//!
//! # Example
//!
//! ```no_run
//! # use saturn::builder::Builder;
//! # use saturn::http::ApiServer;
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     let api = platform.require::<ApiServer>();
//!     if api.is_configured() {
//!         ApiServer::fork(&api);
//!     }
//! }
//! ```
use std::sync::Arc;
use std::time::Duration;

use hyper::{Body, Request, Response, StatusCode};

use crate::config::Config;
use crate::error::CacheError;
use crate::http::server::{Endpoint, HttpServer};
use crate::http::{respond, text};
use crate::platform::Platform;
use crate::registry::Registry;
use crate::spawn;

/// Contains the port used by the API server if none is configured.
pub const DEFAULT_API_PORT: i64 = 9999;

/// Contains the only path served by the API server.
pub const API_PATH: &str = "/api";

/// Represents the front-end server of a node.
pub struct ApiServer {
    server: HttpServer,
    platform: Arc<Platform>,
}

impl ApiServer {
    /// Creates and installs an **ApiServer** into the given **Platform**.
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder) unless disabled. Just
    /// like the [HttpServer], the server has to be started manually.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let server = Arc::new(ApiServer {
            server: HttpServer::new(platform, Endpoint::Api),
            platform: platform.clone(),
        });
        platform.register::<ApiServer>(server.clone());

        server
    }

    /// Determines if the config contains an **api** section.
    pub fn is_configured(&self) -> bool {
        self.platform
            .find::<Config>()
            .map(|config| config.current().query("api").as_hash().is_some())
            .unwrap_or(false)
    }

    /// Returns the address the server socket is currently bound to.
    pub fn current_address(&self) -> Option<String> {
        self.server.current_address()
    }

    /// Opens the server socket and answers requests until the platform is terminated.
    pub async fn event_loop(&self) {
        self.server.event_loop().await;
    }

    /// Starts the event loop in a separate task.
    pub fn fork(server: &Arc<ApiServer>) {
        let cloned_server = server.clone();
        spawn!(async move {
            cloned_server.event_loop().await;
        });
    }

    /// Starts the event loop in a separate task and waits until the socket has been bound.
    pub async fn fork_and_await(server: &Arc<ApiServer>) {
        ApiServer::fork(server);

        while server.current_address().is_none() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Answers a request of an end user.
///
/// The status codes match the ones used by [handle](crate::http::handle). An unknown path yields
/// a **404** and a request without a group (and no default group) yields a **400**.
pub async fn handle_api(
    registry: &Registry,
    default_group: Option<&str>,
    request: Request<Body>,
) -> Response<Body> {
    let path = request.uri().path();
    log::debug!("{} {}", request.method(), path);

    if path != API_PATH {
        return text(StatusCode::NOT_FOUND, format!("unexpected path: {}", path));
    }

    let mut key = None;
    let mut group_name = None;
    for pair in request.uri().query().unwrap_or("").split('&') {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        match name {
            "key" => key = decode(value),
            "group" => group_name = decode(value),
            _ => (),
        }
    }

    let group_name = match group_name.as_deref().or(default_group) {
        Some(group_name) => group_name.to_owned(),
        None => return text(StatusCode::BAD_REQUEST, "group is required"),
    };

    let group = match registry.get_group(&group_name) {
        Ok(group) => group,
        Err(error) => return text(StatusCode::NOT_FOUND, error.to_string()),
    };

    match group.get(key.as_deref().unwrap_or("")).await {
        Ok(value) => respond(
            StatusCode::OK,
            "application/octet-stream",
            Body::from(value.byte_slice()),
        ),
        Err(error @ CacheError::InvalidArgument(_)) => {
            text(StatusCode::BAD_REQUEST, error.to_string())
        }
        Err(error) => text(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    }
}

/// Decodes a query parameter, where a "+" represents a space.
fn decode(value: &str) -> Option<String> {
    urlencoding::decode(&value.replace('+', " "))
        .ok()
        .map(|value| value.into_owned())
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::config::Config;
    use crate::group::GetterFn;
    use crate::http::api::{handle_api, ApiServer};
    use crate::registry::Registry;
    use crate::testing::{test_async, SHARED_TEST_RESOURCES};
    use hyper::{Body, Client, Request, StatusCode};

    fn scores() -> Registry {
        let registry = Registry::new();
        let _ = registry
            .new_group(
                "scores",
                2048,
                GetterFn::new(|key: &str| match key {
                    "Tom" => Ok(b"630".to_vec()),
                    "Jack Black" => Ok(b"589".to_vec()),
                    _ => Err(anyhow::anyhow!("{} not exist", key)),
                }),
            )
            .unwrap();

        registry
    }

    async fn get(
        registry: &Registry,
        default_group: Option<&str>,
        uri: &str,
    ) -> (StatusCode, String) {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        let response = handle_api(registry, default_group, request).await;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();

        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn values_are_served() {
        test_async(async {
            let registry = scores();

            assert_eq!(
                get(&registry, Some("scores"), "/api?key=Tom").await,
                (StatusCode::OK, "630".to_owned())
            );
            assert_eq!(
                get(&registry, None, "/api?group=scores&key=Jack+Black").await,
                (StatusCode::OK, "589".to_owned())
            );
            assert_eq!(
                get(&registry, Some("other"), "/api?key=Jack%20Black&group=scores").await,
                (StatusCode::OK, "589".to_owned())
            );
        });
    }

    #[test]
    fn errors_are_mapped_to_status_codes() {
        test_async(async {
            let registry = scores();

            assert_eq!(
                get(&registry, Some("scores"), "/api?key=Unknown").await,
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Unknown not exist".to_owned()
                )
            );
            assert_eq!(
                get(&registry, Some("scores"), "/api").await,
                (StatusCode::BAD_REQUEST, "key is required".to_owned())
            );
            assert_eq!(
                get(&registry, None, "/api?key=Tom").await,
                (StatusCode::BAD_REQUEST, "group is required".to_owned())
            );
            assert_eq!(
                get(&registry, Some("unknown"), "/api?key=Tom").await,
                (StatusCode::NOT_FOUND, "no such group: unknown".to_owned())
            );
            assert_eq!(
                get(&registry, Some("scores"), "/other?key=Tom").await.0,
                StatusCode::NOT_FOUND
            );
        });
    }

    #[test]
    fn api_server_answers_requests() {
        // The API server also uses our test port (1503)...
        let _guard = SHARED_TEST_RESOURCES.lock().unwrap();

        test_async(async {
            let platform = Builder::new()
                .enable_config()
                .enable_registry()
                .enable_api()
                .build()
                .await;
            let api = platform.require::<ApiServer>();
            assert_eq!(api.is_configured(), false);

            platform
                .require::<Config>()
                .load_from_string(
                    "
api:
    host: 127.0.0.1
    port: 1503
    group: scores
",
                    None,
                )
                .unwrap();
            assert_eq!(api.is_configured(), true);

            let _ = platform
                .require::<Registry>()
                .new_group(
                    "scores",
                    2048,
                    GetterFn::new(|key: &str| match key {
                        "Sam" => Ok(b"567".to_vec()),
                        _ => Err(anyhow::anyhow!("{} not exist", key)),
                    }),
                )
                .unwrap();

            ApiServer::fork_and_await(&api).await;
            assert_eq!(api.current_address().unwrap(), "127.0.0.1:1503");

            let response = Client::new()
                .get("http://127.0.0.1:1503/api?key=Sam".parse().unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
            assert_eq!(&body[..], b"567");

            platform.terminate();
        });
    }
}
