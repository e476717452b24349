//! Provides a tiny DI like container to expose all central components of a node.
//!
//! The platform is more or less a simple map which keeps components like the
//! [Config](crate::config::Config), the [Registry](crate::registry::Registry) or the
//! [HttpServer](crate::http::HttpServer) around as **Arc<T>**. Also this keeps the central
//! **is_running** flag which is toggled to *false* once [Platform::terminate] is invoked.
//!
//! Note that [Platform::require] is a good way of fetching a component which is known to be
//! there. However, once the system shutdown is initiated, the internal map is cleared (so that
//! all Drop handlers run). Therefore code which might run after [Platform::terminate] was called
//! should use [Platform::find] and gracefully handle the **None** case.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use saturn::platform::Platform;
//! # use saturn::registry::Registry;
//! let platform = Platform::new();
//!
//! platform.register::<Registry>(Arc::new(Registry::new()));
//! assert_eq!(platform.require::<Registry>().names().is_empty(), true);
//!
//! // Components which haven't been registered yield None...
//! assert_eq!(platform.find::<String>().is_none(), true);
//!
//! // Once terminated, all components are released...
//! platform.terminate();
//! assert_eq!(platform.find::<Registry>().is_none(), true);
//! assert_eq!(platform.is_running(), false);
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Provides a container which keeps all central components of a node in a single place.
///
/// Components are keyed by their type, therefore at most one instance per type can be present.
pub struct Platform {
    components: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    is_running: AtomicBool,
}

impl Platform {
    /// Creates a new and running platform without any components.
    pub fn new() -> Arc<Self> {
        Arc::new(Platform {
            components: Mutex::new(HashMap::new()),
            is_running: AtomicBool::new(true),
        })
    }

    /// Registers a component, replacing any previously registered one of the same type.
    pub fn register<T>(&self, component: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let _ = self
            .components
            .lock()
            .unwrap()
            .insert(TypeId::of::<T>(), component);
    }

    /// Tries to resolve a previously registered component.
    ///
    /// # Examples
    /// ```
    /// # use saturn::platform::Platform;
    /// # use saturn::config::Config;
    /// # use std::sync::Arc;
    /// let platform = Platform::new();
    /// assert_eq!(platform.find::<Config>().is_none(), true);
    ///
    /// platform.register(Arc::new(Config::new("settings.yml")));
    /// assert_eq!(platform.find::<Config>().is_some(), true);
    /// ```
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.components
            .lock()
            .unwrap()
            .get(&TypeId::of::<T>())
            .and_then(|component| component.clone().downcast::<T>().ok())
    }

    /// Resolves a component which is known to be present.
    ///
    /// # Panics
    /// Panics if the requested component isn't available, either as it was never registered
    /// or as the platform has already been terminated.
    ///
    /// ```should_panic
    /// # use saturn::platform::Platform;
    /// # use saturn::registry::Registry;
    /// let platform = Platform::new();
    /// platform.require::<Registry>();
    /// ```
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        if !self.is_running() {
            panic!(
                "A required component ({}) has been requested but the system is already shutting down!",
                std::any::type_name::<T>()
            );
        }

        self.find::<T>().unwrap_or_else(|| {
            panic!(
                "A required component ({}) was not available in the platform registry!",
                std::any::type_name::<T>()
            )
        })
    }

    /// Determines if the platform is still running or if [Platform::terminate] has already
    /// been called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the platform.
    ///
    /// This releases all components (so that their Drop handlers run eventually) and toggles
    /// the [is_running()](Platform::is_running) flag to **false**. Long running tasks like the
    /// [HttpServer](crate::http::HttpServer) observe this flag and shut down.
    pub fn terminate(&self) {
        self.components.lock().unwrap().clear();
        self.is_running.store(false, Ordering::Release);
    }
}
