// Library exports for the binary and integration tests.

/// Application version (root crate version, for use by sub-crates).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod debug;
pub mod invalidator;
pub mod platform;
pub mod scheduler;
pub mod stores;

pub use freshness_config as config;
pub use freshness_probe as probe;

pub use invalidator::{CacheInvalidator, PurgeReport};
pub use scheduler::{FreshnessHandle, FreshnessService, FreshnessState, Phase};
