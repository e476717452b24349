//! Contains the system configuration.
//!
//! Provides access to the system configuration which is loaded from the **config/settings.yml**
//! file (or the file named by the **SATURN_CONFIG** environment variable). This file is observed
//! for changes and reloaded once a change is detected. Therefore each user of the config should
//! attach itself to the [Config::notifier] and re-process the config once a change message is
//! received. The [HttpServer](crate::http::HttpServer) uses this
//! to move to another address and the [HttpPool](crate::http::HttpPool) rebuilds its ring of
//! peers, both without restarting the node (and therefore without losing any cached data).
//!
//! Note that the **Config** struct is kind of constant and can be obtained from the **Platform**
//! once and then kept around. However, the handle returned by [Config::current] should not be
//! stored, as it will not be updated once a new config has been loaded.
//!
//! # Examples
//!
//! Obtaining and reading the config:
//! ```
//! # use saturn::builder::Builder;
//! # use saturn::config::Config;
//! # #[tokio::main]
//! # async fn main() {
//! # let platform = Builder::new().enable_config().build().await;
//!
//! // Obtain the config...
//! let config = platform.require::<Config>();
//!
//! // Fetch the current config document (might be reloaded from time to time) and read the
//! // selected server port..
//! let port = config.current().query("server.port").as_i64().unwrap_or(8001);
//! # }
//! ```
//!
//! Attaching a change listener:
//! ```no_run
//! # use saturn::builder::Builder;
//! # use saturn::config::Config;
//! # #[tokio::main]
//! # async fn main() {
//! # let platform = Builder::new().enable_config().build().await;
//!
//! let config = platform.require::<Config>();
//! tokio::spawn(async move {
//!     loop {
//!         match config.notifier().recv().await {
//!             Ok(_) => log::info!("Config update received..."),
//!             _ => return,
//!         }
//!     }
//! });
//! # }
//! ```
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::platform::Platform;

/// Provides access to the system configuration.
///
/// Most probably a config instance is installed by the [Builder](crate::builder::Builder) and
/// can be obtained via `platform.require::<Config>()`.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// Internally this is simply the receiver of a broadcast. The message itself carries no
/// information. Once it has been received, the config was changed and needs to be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
///
/// Note that this handle should not be stored or kept around for long, as it will not be updated
/// if the underlying config changed.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates a new config reading the given file.
    ///
    /// Note that this will not install a change listener. This is only done by the
    /// [install] function.
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::Null, None))),
            tx,
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file on disk.
    ///
    /// As within docker, the file is presented as volume, we check that it is a file, as an
    /// unmounted docker volume is always presented as directory.
    #[cfg(not(test))]
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Forces the config to read the underlying file.
    ///
    /// Note that this is normally called by the framework and should not be invoked manually.
    pub async fn load(&self) -> anyhow::Result<()> {
        log::info!("Loading config file {}...", &self.filename);

        if let Ok(metadata) = tokio::fs::metadata(&self.filename).await {
            if !metadata.is_file() {
                log::info!(
                    "Config file doesn't exist or is an unmounted docker volume - skipping config load."
                );
                return Ok(());
            }
        }

        let config_data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        let last_modified = tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok());

        self.load_from_string(config_data.as_str(), last_modified)
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// This is intended to be used in test environments where we cannot / do not want to load
    /// a config file from disk. A malformed document is rejected and the previous configuration
    /// remains active.
    ///
    /// # Example
    ///
    /// ```
    /// # use saturn::config::Config;
    /// let config = Config::new("somefile.yml");
    /// config.load_from_string("
    /// peers:
    ///     self: http://localhost:8001
    ///     replicas: 50
    /// ", None).unwrap();
    ///
    /// assert_eq!(config.current().query("peers.replicas").as_i64().unwrap(), 50);
    /// assert_eq!(config.current().query("peers.self").as_str().unwrap(), "http://localhost:8001");
    /// assert_eq!(config.current().query("peers.unknown.path").is_badvalue(), true);
    /// ```
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let mut docs = YamlLoader::load_from_str(data).map_err(|error| {
            anyhow::anyhow!("Cannot parse config file {}: {}", &self.filename, error)
        })?;

        let doc = if docs.is_empty() {
            Yaml::Null
        } else {
            docs.swap_remove(0)
        };

        self.config.store(Arc::new((doc, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.send(());

        Ok(())
    }
}

impl Handle {
    /// Provides access to the currently loaded configuration.
    pub fn config(&self) -> &Yaml {
        &self.config.0
    }

    /// Resolves a dotted path (like "peers.base_path") against the currently loaded configuration.
    ///
    /// Returns **Yaml::BadValue** if any part of the path is missing.
    pub fn query(&self, query: impl AsRef<str>) -> &Yaml {
        query
            .as_ref()
            .split('.')
            .fold(&self.config.0, |yaml, key| &yaml[key])
    }
}

/// Contains the config file being used unless **SATURN_CONFIG** names another one.
pub const DEFAULT_CONFIG_FILE: &str = "config/settings.yml";

/// Contains the name of the environment variable which selects the config file to use.
///
/// As all settings of a node (most notably its own address) live in this file, this permits to
/// run several nodes from a single directory, e.g. `SATURN_CONFIG=config/node-2.yml`.
pub const CONFIG_FILE_VARIABLE: &str = "SATURN_CONFIG";

fn settings_file(from_environment: Option<String>) -> String {
    from_environment
        .filter(|file| !file.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_owned())
}

/// Creates an installs a **Config** for the given platform.
///
/// This will read its contents from **settings.yml** (or the file named by
/// [CONFIG_FILE_VARIABLE]) and also install a change listener for this
/// file. Note that this listener will only watch the "last modified" date of the file and will
/// not perform a structural comparison. Therefore it is the duty of each config user to gracefully
/// handle partial config changes.
///
/// Note that this method is also called by the [Builder](crate::builder::Builder) unless the
/// **Config** part is disabled.
pub async fn install(platform: Arc<Platform>) {
    let file = settings_file(std::env::var(CONFIG_FILE_VARIABLE).ok());
    if let Some(path) = Path::new(&file).parent().filter(|path| !path.as_os_str().is_empty()) {
        if let Err(error) = tokio::fs::create_dir_all(path).await {
            log::warn!(
                "Failed to create config base directory {}: {}",
                path.to_string_lossy(),
                error
            )
        }
    }

    let config = Arc::new(Config::new(&file));
    platform.register::<Config>(config.clone());

    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    run_config_change_monitor(platform, config);
}

#[cfg(test)]
fn run_config_change_monitor(_platform: Arc<Platform>, _config: Arc<Config>) {
    // No automatic updates during testing...
}

#[cfg(not(test))]
fn run_config_change_monitor(platform: Arc<Platform>, config: Arc<Config>) {
    let _ = tokio::spawn(async move {
        while platform.is_running() {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;

            // None if the file is absent...
            let last_modified = config.last_modified().await;

            // None if nothing has been loaded yet...
            let last_loaded = config.config.load().1;

            if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded) {
                match config.load().await {
                    Ok(_) => {
                        log::info!("System configuration was re-loaded.");
                    }
                    Err(error) => log::error!("Failed to re-load system config: {:#}", error),
                }
            }
        }
    });
}
