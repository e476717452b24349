use std::collections::HashMap;
use std::sync::Arc;

use saturn::builder::Builder;
use saturn::config::Config;
use saturn::fmt::{format_size, size_setting};
use saturn::group::GetterFn;
use saturn::http::{ApiServer, HttpPool, HttpServer};
use saturn::platform::Platform;
use saturn::registry::Registry;

/// Declares the demo group "scores" which is backed by a tiny (and slow) in-memory database.
fn declare_scores(platform: &Arc<Platform>) -> anyhow::Result<()> {
    let max_bytes = size_setting(
        platform
            .require::<Config>()
            .current()
            .query("groups.scores.max_size"),
        2048,
    )?;

    let db: HashMap<&'static str, &'static str> =
        [("Tom", "630"), ("Jack", "589"), ("Sam", "567")]
            .into_iter()
            .collect();

    let group = platform.require::<Registry>().new_group(
        "scores",
        max_bytes,
        GetterFn::new(move |key: &str| {
            log::info!("[SlowDB] search key {}", key);
            db.get(key)
                .map(|score| score.as_bytes().to_vec())
                .ok_or_else(|| anyhow::anyhow!("{} not exist", key))
        }),
    )?;
    log::info!("Group 'scores' uses up to {}.", format_size(max_bytes));

    group.register_peers(HttpPool::install(platform)?)?;

    Ok(())
}

#[tokio::main]
async fn main() {
    // Build a platform and enable all features. Use SATURN_CONFIG to select the config file of
    // this node (e.g. when running several nodes from one directory)...
    let platform = Builder::new().enable_all().build().await;

    if let Err(error) = declare_scores(&platform) {
        log::error!("Failed to set up the node: {:#}", error);
        std::process::exit(1);
    }

    // Only nodes with an "api" section serve end users...
    let api = platform.require::<ApiServer>();
    if api.is_configured() {
        ApiServer::fork(&api);
    }

    platform.require::<HttpServer>().event_loop().await;
}
