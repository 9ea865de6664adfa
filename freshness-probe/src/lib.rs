//! Stale-build detection for the build-freshness subsystem.
//!
//! Provides:
//! - `version_probe`: the [`VersionProbe`] trait, its HTTP implementation and
//!   the advisory [`UpdateWorker`] hook
//! - `http`: agent construction, URL validation and cache-busting helpers

pub mod http;
pub mod version_probe;

pub use version_probe::{
    HttpVersionProbe, ProbeError, UpdateWorker, Verdict, VersionProbe, compare_versions,
};
