//! Configuration system for the build-freshness subsystem.
//!
//! This crate provides configuration loading, saving, validation and default
//! values for the stale-build detector. It includes:
//!
//! - [`FreshnessConfig`]: timing policy, probe targets and store locations
//! - [`defaults`]: serde default functions for every field
//! - [`ConfigError`]: typed I/O, parse and validation failures

pub mod config;
pub mod defaults;
pub mod error;

pub use config::FreshnessConfig;
pub use error::ConfigError;
