//! Default values for [`crate::FreshnessConfig`] fields.
//!
//! Each function is referenced from a `#[serde(default = "...")]` attribute so
//! a partial YAML file only needs to mention what it overrides.

use std::path::PathBuf;

/// Name of the application directory under the platform config/cache roots.
pub const APP_DIR_NAME: &str = "freshness";

// ── Primitive helpers ──────────────────────────────────────────────────────

pub fn bool_false() -> bool {
    false
}

pub fn bool_true() -> bool {
    true
}

// ── Timing ─────────────────────────────────────────────────────────────────

/// Periodic probe cadence (5 minutes).
pub fn check_interval_ms() -> u64 {
    5 * 60 * 1000
}

pub fn auto_refresh_delay_ms() -> u64 {
    10_000
}

/// Settle window for visibility/connectivity triggers.
pub fn settle_delay_ms() -> u64 {
    1_000
}

pub fn probe_timeout_ms() -> u64 {
    30_000
}

// ── Invalidation ───────────────────────────────────────────────────────────

/// Persisted keys holding update bookkeeping.
pub fn persisted_keys() -> Vec<String> {
    [
        "app_version",
        "last_update_check",
        "update_available",
        "update_dismissed_at",
        "worker_version",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

// ── Locations ──────────────────────────────────────────────────────────────

pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".freshness-cache"))
}

pub fn state_file() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME).join("state.json"))
        .unwrap_or_else(|| PathBuf::from("freshness-state.json"))
}
