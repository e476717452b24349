//! Provides a builder which can be used to setup and initialize the framework.
//!
//! As most components of Saturn are optional (e.g. an application might embed groups without
//! ever talking to other peers), a builder permits to selectively enable or disable them.
//!
//! # Example
//! Setting up the framework with all features enabled:
//! ```no_run
//! # use saturn::builder::Builder;
//! # use saturn::http::{HttpPool, HttpServer};
//! # use saturn::registry::Registry;
//! # use saturn::group::GetterFn;
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Declare the groups of this node...
//!     let group = platform.require::<Registry>().new_group(
//!         "scores",
//!         2048,
//!         GetterFn::new(|key: &str| Ok(key.as_bytes().to_vec())),
//!     )?;
//!
//!     // Let them talk to the other peers...
//!     group.register_peers(HttpPool::install(&platform)?)?;
//!
//!     // Start the main event loop of the server...
//!     platform.require::<HttpServer>().event_loop().await;
//!
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

use crate::http::{ApiServer, HttpServer};
use crate::platform::Platform;
use crate::registry::Registry;
use crate::{init_logging, SATURN_REVISION, SATURN_VERSION};

/// Initializes the framework by creating and initializing all core components.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    enable_signals: bool,
    setup_config: bool,
    setup_registry: bool,
    setup_server: bool,
    setup_api: bool,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Enables all features.
    ///
    /// Note that using this method (and then maybe disabling selected components) is quite
    /// convenient, but be aware that new components which might be added in a library update
    /// will then also be enabled by default.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.setup_config = true;
        self.setup_registry = true;
        self.setup_server = true;
        self.setup_api = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout. As we intend Saturn
    /// nodes to be run in docker containers, this is all that is needed for proper logging.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs a signal listener which terminates the framework once **CTRL-C**, **SIGHUP** or
    /// **SIGTERM** is received.
    ///
    /// For more details see: [signals](crate::signals)
    pub fn enable_signals(mut self) -> Self {
        self.enable_signals = true;
        self
    }

    /// Disables installing the signal listener after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }

    /// Installs [config::Config](crate::config::Config) and loads the **settings.yml**.
    ///
    /// For more details see: [config](crate::config)
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables setting up a **Config** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Creates and installs a [Registry](crate::registry::Registry) to declare groups.
    pub fn enable_registry(mut self) -> Self {
        self.setup_registry = true;
        self
    }

    /// Disables setting up a **Registry** after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_registry(mut self) -> Self {
        self.setup_registry = false;
        self
    }

    /// Creates and installs an [HttpServer](crate::http::HttpServer) instance.
    ///
    /// As the server serves the groups of the [Registry](crate::registry::Registry), this
    /// also installs a registry. Note that still, the main event loop has to be invoked manually
    /// via: `platform.require::<HttpServer>().event_loop().await`.
    pub fn enable_server(mut self) -> Self {
        self.setup_server = true;
        self
    }

    /// Disables setting up an **HttpServer** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_server(mut self) -> Self {
        self.setup_server = false;
        self
    }

    /// Creates and installs an [ApiServer](crate::http::ApiServer) instance.
    ///
    /// Just like the **HttpServer**, this also installs a registry. Note that the server is only
    /// started by the application, most probably only if
    /// [is_configured](crate::http::ApiServer::is_configured) is true.
    pub fn enable_api(mut self) -> Self {
        self.setup_api = true;
        self
    }

    /// Disables setting up an **ApiServer** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_api(mut self) -> Self {
        self.setup_api = false;
        self
    }

    /// Builds the [Platform](crate::platform::Platform) registry with all the enabled components
    /// being registered.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. SATURN (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            SATURN_VERSION,
            SATURN_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.enable_signals {
            crate::signals::install(platform.clone());
        }

        if self.setup_config {
            crate::config::install(platform.clone()).await;
        }

        if self.setup_registry || self.setup_server || self.setup_api {
            let _ = Registry::install(&platform);
        }

        if self.setup_server {
            let _ = HttpServer::install(&platform);
        }

        if self.setup_api {
            let _ = ApiServer::install(&platform);
        }

        platform
    }
}
