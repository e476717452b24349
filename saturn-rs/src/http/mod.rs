//! Provides the HTTP transport used by peers to exchange values.
//!
//! Each node runs an [HttpServer] which answers requests of other peers and an [HttpPool] which
//! decides which peer owns a key and fetches values from it. Both agree on a common **base path**
//! (**peers.base_path** in the config, "/_saturn/" by default). A value is then addressed as
//! `<base path><group>/<key>` where both, the group name and the key, are URL encoded.
//!
//! Requesting the base path itself yields the statistics of all groups as JSON.
//!
//! Next to this, a node can run an [ApiServer] which lets end users query values via
//! `GET /api?key=<key>`.
//!
//! Responses to valid requests carry the raw bytes of the value as `application/octet-stream`.
//! Errors are reported using plain text and the following status codes:
//! * **400**: The path doesn't start with the base path or no key is given.
//! * **404**: The requested group is unknown.
//! * **500**: The group failed to provide a value (e.g. as its getter failed).
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, StatusCode};
use serde_json::json;

use crate::config::Handle;
use crate::error::CacheError;
use crate::registry::Registry;

mod api;
mod pool;
mod server;

pub use api::{handle_api, ApiServer, API_PATH, DEFAULT_API_PORT};
pub use pool::{HttpFetcher, HttpPool};
pub use server::HttpServer;

/// Contains the base path used if none is configured.
pub const DEFAULT_BASE_PATH: &str = "/_saturn/";

/// Reads and verifies the base path from the given config (**peers.base_path**).
///
/// # Examples
///
/// ```
/// # use saturn::config::Config;
/// # use saturn::http::base_path;
/// let config = Config::new("test.yml");
/// assert_eq!(base_path(&config.current()).unwrap(), "/_saturn/");
///
/// config.load_from_string("peers:\n    base_path: /cache/", None).unwrap();
/// assert_eq!(base_path(&config.current()).unwrap(), "/cache/");
///
/// config.load_from_string("peers:\n    base_path: cache", None).unwrap();
/// assert_eq!(base_path(&config.current()).is_err(), true);
/// ```
pub fn base_path(handle: &Handle) -> anyhow::Result<String> {
    let base_path = handle
        .query("peers.base_path")
        .as_str()
        .unwrap_or(DEFAULT_BASE_PATH);

    if !base_path.starts_with('/') || !base_path.ends_with('/') {
        return Err(anyhow::anyhow!(
            "The base path '{}' has to start and end with a '/'.",
            base_path
        ));
    }

    Ok(base_path.to_owned())
}

/// Answers a request of a peer (or any other HTTP client).
pub async fn handle(
    registry: &Registry,
    base_path: &str,
    request: Request<Body>,
) -> Response<Body> {
    let path = request.uri().path();
    log::debug!("{} {}", request.method(), path);

    let rest = match path.strip_prefix(base_path) {
        Some(rest) => rest,
        None => return text(StatusCode::BAD_REQUEST, format!("unexpected path: {}", path)),
    };

    if rest.is_empty() {
        return stats(registry);
    }

    let (group_name, key) = match rest.split_once('/') {
        Some((group_name, key)) => {
            match (urlencoding::decode(group_name), urlencoding::decode(key)) {
                (Ok(group_name), Ok(key)) => (group_name, key),
                _ => return text(StatusCode::BAD_REQUEST, "bad request"),
            }
        }
        None => return text(StatusCode::BAD_REQUEST, "bad request"),
    };

    let group = match registry.get_group(&group_name) {
        Ok(group) => group,
        Err(error) => return text(StatusCode::NOT_FOUND, error.to_string()),
    };

    match group.get(&key).await {
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

fn stats(registry: &Registry) -> Response<Body> {
    let groups: Vec<serde_json::Value> = registry
        .groups()
        .iter()
        .map(|group| {
            let stats = group.stats();
            json!({
                "name": group.name(),
                "gets": stats.gets,
                "cache_hits": stats.cache_hits,
                "loads": stats.loads,
                "coalesced_waits": stats.coalesced_waits,
                "peer_loads": stats.peer_loads,
                "peer_errors": stats.peer_errors,
                "local_loads": stats.local_loads,
                "local_errors": stats.local_errors,
                "cache": {
                    "entries": stats.cache.entries,
                    "used_bytes": stats.cache.used_bytes,
                    "max_bytes": stats.cache.max_bytes,
                    "reads": stats.cache.reads,
                    "hits": stats.cache.hits,
                    "evictions": stats.cache.evictions,
                }
            })
        })
        .collect();

    respond(
        StatusCode::OK,
        "application/json",
        Body::from(json!({ "groups": groups }).to_string()),
    )
}

fn text(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    respond(status, "text/plain; charset=utf-8", Body::from(message.into()))
}

fn respond(status: StatusCode, content_type: &'static str, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let _ = response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));

    response
}
