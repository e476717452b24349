//! Defines the errors reported by groups and the registry.
//!
//! All failures are represented by a single [CacheError] so that callers (like the HTTP layer)
//! can map them onto a response without having to know where exactly they originated. As a load
//! result is shared among all coalesced callers, the error has to be cheaply cloneable. Therefore
//! the underlying causes are kept in an **Arc**.
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Enumerates the failures of the cache.
#[derive(Clone, Debug)]
pub enum CacheError {
    /// Signals that a caller provided an invalid argument (e.g. an empty key).
    InvalidArgument(String),

    /// Signals a setup problem, like registering peers twice or declaring a group twice.
    Configuration(String),

    /// Signals that a named group does not exist.
    NotFound(String),

    /// Signals that the local getter failed to produce a value.
    LoadFailure(Arc<anyhow::Error>),

    /// Signals that fetching a value from a remote peer failed.
    FetchFailure(Arc<anyhow::Error>),
}

impl CacheError {
    /// Wraps the given error of a getter.
    pub fn load_failure(error: anyhow::Error) -> Self {
        CacheError::LoadFailure(Arc::new(error))
    }

    /// Wraps the given error of a peer fetcher.
    pub fn fetch_failure(error: anyhow::Error) -> Self {
        CacheError::FetchFailure(Arc::new(error))
    }
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::InvalidArgument(message) => write!(f, "{}", message),
            CacheError::Configuration(message) => write!(f, "{}", message),
            CacheError::NotFound(message) => write!(f, "{}", message),
            CacheError::LoadFailure(error) => write!(f, "{:#}", error),
            CacheError::FetchFailure(error) => write!(f, "{:#}", error),
        }
    }
}

impl Error for CacheError {}
