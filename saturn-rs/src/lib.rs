//! Saturn is a library for running an embedded, distributed cache within a cluster of nodes.
//!
//! # Introduction
//! **Saturn** keeps expensive to compute (or expensive to fetch) values in memory and shares
//! them across a set of peers. Each key is owned by exactly one peer, which is determined by a
//! consistent hash ring. If a node is asked for a key it doesn't own, it fetches the value from
//! the owner instead of computing it itself. Therefore each value is computed once per cluster
//! rather than once per node.
//!
//! Values are organized in **groups**. Each group has a name, a memory budget and a **getter**
//! which computes the value for a missing key. Values are immutable once cached. There are no
//! explicit updates, deletes or expiry times. Entries are only ever evicted to keep the cache
//! within its budget.
//!
//! # Features
//! * **Size bounded LRU caches** - Each group keeps its values in an LRU cache which is bounded
//!   by the number of bytes occupied by keys and values (see [lru]).
//! * **Consistent hashing** - Keys are distributed among the peers by a ring with virtual nodes,
//!   so that adding or removing a peer only moves a fraction of all keys (see [ring]).
//! * **Load coalescing** - Concurrent requests for the same missing key are collapsed into a
//!   single load or fetch, which protects the underlying data source (see [flight]).
//! * **100% Async/Await** - Everything builds upon [tokio](https://tokio.rs/) and
//!   [hyper](https://hyper.rs/).
//! * **Reload-aware config facility** which permits to update the list of peers or the server
//!   address during operation. Therefore no restart (and thus no loss of cached data) is required.
//!
//! # Modules
//! * **Group**: The main entry point which combines a cache, a getter and the peers. See
//!   [group] and [registry].
//! * **HTTP**: The transport used by peers to exchange values. See [http].
//!
//! # Examples
//! A complete example of a node can be found in **saturn-io**. A short example on how to
//! initialize the library can be found here [Builder](builder::Builder).
#![deny(
    warnings,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod builder;
pub mod config;
pub mod error;
pub mod flight;
pub mod fmt;
pub mod group;
pub mod http;
pub mod lru;
pub mod peers;
pub mod platform;
pub mod registry;
pub mod ring;
pub mod signals;
pub mod view;

/// Contains the version of the Saturn library.
pub const SATURN_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the Saturn build being used.
pub const SATURN_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// framework, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Tests and embedding applications might call this several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned join handle to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate saturn;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

#[cfg(test)]
mod testing {
    use std::sync::Mutex;

    lazy_static::lazy_static! {
        /// Provides a global lock which has to be acquired if a test operates on shared
        /// resources. This is our test port (1503) on which we start a local server for
        /// integration tests. Using this lock, all other tests still run in parallel.
        pub static ref SHARED_TEST_RESOURCES: Mutex<()> = Mutex::new(());
    }

    /// Executes async code within a single threaded tokio runtime.
    pub fn test_async<F: std::future::Future>(future: F) {
        use tokio::runtime;

        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let _ = rt.block_on(future);
    }
}
