//! Keeps track of all groups known to the local node.
//!
//! Other peers request values by naming a group, therefore all groups which should be reachable
//! have to be created via [Registry::new_group]. The registry itself is an ordinary component,
//! which is most probably created by the [Builder](crate::builder::Builder) and then obtained
//! via `platform.require::<Registry>()`.
//!
//! Note that groups live as long as the registry. There is no way to remove a group once it has
//! been declared.
//!
//! # Examples
//!
//! ```
//! # use saturn::group::GetterFn;
//! # use saturn::registry::Registry;
//! # #[tokio::main]
//! # async fn main() {
//! let registry = Registry::new();
//! let group = registry
//!     .new_group("scores", 2048, GetterFn::new(|key: &str| Ok(key.as_bytes().to_vec())))
//!     .unwrap();
//!
//! // The group can be looked up by its name...
//! let same_group = registry.get_group("scores").unwrap();
//! assert_eq!(same_group.get("Tom").await.unwrap().as_string(), "Tom");
//! assert_eq!(group.stats().local_loads, 1);
//!
//! // ...but each name can only be used once.
//! assert_eq!(
//!     registry.new_group("scores", 2048, GetterFn::new(|_: &str| Ok(Vec::new()))).is_err(),
//!     true
//! );
//! # }
//! ```
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::CacheError;
use crate::group::{Getter, Group};
use crate::platform::Platform;

/// Provides a name based lookup of all groups of this node.
#[derive(Default)]
pub struct Registry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl Registry {
    /// Creates a new and empty registry.
    pub fn new() -> Self {
        Registry {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Creates and installs a **Registry** into the given **Platform**.
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder) unless disabled.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        platform.register::<Registry>(registry.clone());

        registry
    }

    /// Creates and registers a new group.
    ///
    /// Fails with a [CacheError::Configuration] if the name is empty or already in use.
    pub fn new_group(
        &self,
        name: &str,
        max_bytes: usize,
        getter: impl Getter + 'static,
    ) -> Result<Arc<Group>, CacheError> {
        if name.is_empty() {
            return Err(CacheError::Configuration(
                "A group requires a non-empty name".to_owned(),
            ));
        }

        let mut groups = self.groups.write().unwrap();
        if groups.contains_key(name) {
            return Err(CacheError::Configuration(format!(
                "A group named '{}' has already been declared",
                name
            )));
        }

        let group = Arc::new(Group::new(name, max_bytes, getter));
        let _ = groups.insert(name.to_owned(), group.clone());
        log::info!("Declared group '{}' with a budget of {} bytes.", name, max_bytes);

        Ok(group)
    }

    /// Resolves a previously declared group.
    ///
    /// Fails with a [CacheError::NotFound] if no such group exists.
    pub fn get_group(&self, name: &str) -> Result<Arc<Group>, CacheError> {
        self.groups
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(format!("no such group: {}", name)))
    }

    /// Returns the names of all groups in alphabetical order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().unwrap().keys().cloned().collect();
        names.sort();

        names
    }

    /// Returns all groups ordered by their name.
    pub fn groups(&self) -> Vec<Arc<Group>> {
        let mut groups: Vec<Arc<Group>> = self.groups.read().unwrap().values().cloned().collect();
        groups.sort_by(|a, b| a.name().cmp(b.name()));

        groups
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::error::CacheError;
    use crate::group::GetterFn;
    use crate::registry::Registry;
    use crate::testing::test_async;

    fn echo() -> GetterFn<impl Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync> {
        GetterFn::new(|key: &str| Ok(key.as_bytes().to_vec()))
    }

    #[test]
    fn groups_are_found_by_name() {
        let registry = Registry::new();
        let scores = registry.new_group("scores", 2048, echo()).unwrap();
        let _ = registry.new_group("avatars", 0, echo()).unwrap();

        assert_eq!(registry.get_group("scores").unwrap().name(), scores.name());
        assert_eq!(registry.names(), vec!["avatars", "scores"]);
        assert_eq!(registry.groups().len(), 2);
    }

    #[test]
    fn invalid_or_duplicate_names_are_rejected() {
        let registry = Registry::new();
        let _ = registry.new_group("scores", 2048, echo()).unwrap();

        match registry.new_group("scores", 1024, echo()) {
            Err(CacheError::Configuration(message)) => {
                assert_eq!(message.contains("scores"), true)
            }
            other => panic!("Unexpected result: {:?}", other.map(|group| group.stats())),
        }
        match registry.new_group("", 1024, echo()) {
            Err(CacheError::Configuration(_)) => (),
            other => panic!("Unexpected result: {:?}", other.map(|group| group.stats())),
        }

        assert_eq!(registry.names(), vec!["scores"]);
    }

    #[test]
    fn unknown_groups_are_reported() {
        let registry = Registry::new();
        match registry.get_group("unknown") {
            Err(error @ CacheError::NotFound(_)) => {
                assert_eq!(error.to_string(), "no such group: unknown")
            }
            other => panic!("Unexpected result: {:?}", other.map(|group| group.stats())),
        }
    }

    #[test]
    fn registry_is_installed_by_the_builder() {
        test_async(async {
            let platform = Builder::new().enable_registry().build().await;
            let registry = platform.require::<Registry>();
            let _ = registry.new_group("scores", 2048, echo()).unwrap();

            assert_eq!(
                platform.require::<Registry>().get_group("scores").is_ok(),
                true
            );
        });
    }
}
