//! Platform capabilities consumed by the freshness subsystem.
//!
//! The scheduler and invalidator only see these traits; native
//! implementations live in [`crate::stores`], tests substitute fakes.

use thiserror::Error;

pub use freshness_probe::UpdateWorker;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize store: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid cache name '{0}'")]
    InvalidName(String),
}

/// Named cache stores held by the client runtime.
pub trait CacheStorage: Send + Sync {
    /// Names of every cache currently present.
    fn cache_names(&self) -> Result<Vec<String>, PlatformError>;

    /// Delete one cache. Returns `false` if it was already gone.
    fn delete_cache(&self, name: &str) -> Result<bool, PlatformError>;
}

/// Persisted key/value bookkeeping.
pub trait KeyStore: Send + Sync {
    /// Remove `key`. Returns `false` if it was not present.
    fn remove(&self, key: &str) -> Result<bool, PlatformError>;
}

/// Forces a full reload of the client. Called at most once per instance.
pub trait Reloader: Send + Sync {
    fn reload(&self);
}
