//! The [`FreshnessConfig`] struct and its persistence methods.
//!
//! Covers:
//! - `load` / `load_or_default` / `save` (YAML file I/O with atomic write)
//! - `validate` (semantic checks that serde cannot express)
//! - `Duration` accessors for the millisecond timing fields
//! - XDG-style default path resolution

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for one freshness subsystem instance.
///
/// Immutable once the subsystem is started; a changed file takes effect on the
/// next `start()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessConfig {
    /// Master switch. A disabled subsystem never probes and never reloads.
    #[serde(default = "crate::defaults::bool_true")]
    pub enabled: bool,

    /// Milliseconds between periodic probes.
    #[serde(default = "crate::defaults::check_interval_ms")]
    pub check_interval_ms: u64,

    /// Milliseconds between detecting a stale build and reloading
    /// automatically. Ignored in development mode.
    #[serde(default = "crate::defaults::auto_refresh_delay_ms")]
    pub auto_refresh_delay_ms: u64,

    /// Milliseconds a visibility/connectivity trigger waits before probing.
    /// Further triggers inside the window are dropped.
    #[serde(default = "crate::defaults::settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Interactive development mode: updates are surfaced but never acted on
    /// automatically. Supplied by the host application.
    #[serde(default = "crate::defaults::bool_false")]
    pub development_mode: bool,

    /// Hard deadline for a single probe, in milliseconds.
    #[serde(default = "crate::defaults::probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Map probe failures (network errors, timeouts) to a stale verdict.
    #[serde(default = "crate::defaults::bool_true")]
    pub treat_probe_errors_as_stale: bool,

    /// Application entry resource checked for existence on every probe.
    #[serde(default)]
    pub entry_url: String,

    /// Optional JSON document of the form `{ "version": "1.2.3" }` describing
    /// the build currently served.
    #[serde(default)]
    pub version_manifest_url: Option<String>,

    /// Version of the loaded build, compared against the manifest.
    #[serde(default)]
    pub current_version: Option<String>,

    /// Persisted keys removed before a reload.
    #[serde(default = "crate::defaults::persisted_keys")]
    pub persisted_keys: Vec<String>,

    /// Root directory holding one subdirectory per named cache.
    #[serde(default = "crate::defaults::cache_dir")]
    pub cache_dir: PathBuf,

    /// JSON file holding persisted key/value bookkeeping.
    #[serde(default = "crate::defaults::state_file")]
    pub state_file: PathBuf,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: crate::defaults::check_interval_ms(),
            auto_refresh_delay_ms: crate::defaults::auto_refresh_delay_ms(),
            settle_delay_ms: crate::defaults::settle_delay_ms(),
            development_mode: false,
            probe_timeout_ms: crate::defaults::probe_timeout_ms(),
            treat_probe_errors_as_stale: true,
            entry_url: String::new(),
            version_manifest_url: None,
            current_version: None,
            persisted_keys: crate::defaults::persisted_keys(),
            cache_dir: crate::defaults::cache_dir(),
            state_file: crate::defaults::state_file(),
        }
    }
}

impl FreshnessConfig {
    /// Load and validate configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        log::info!("Loading freshness config from {:?}", path);
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_yaml_ng::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent.
    ///
    /// A file that exists but fails to parse or validate is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            log::info!("Config file {:?} not found, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a YAML file.
    ///
    /// Writes to a temp file first and renames it into place so a crash never
    /// leaves a truncated config behind.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let yaml = serde_yaml_ng::to_string(self).map_err(ConfigError::Serialize)?;

        let temp_path = path.with_extension("yaml.tmp");
        fs::write(&temp_path, &yaml)?;
        fs::rename(&temp_path, path)?;

        log::debug!("Saved freshness config to {:?}", path);
        Ok(())
    }

    /// Reject values that would stall or spin the scheduler.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("check_interval_ms", self.check_interval_ms),
            ("settle_delay_ms", self.settle_delay_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "{field} must be greater than zero"
                )));
            }
        }

        if self.version_manifest_url.is_some() && self.current_version.is_none() {
            return Err(ConfigError::Validation(
                "version_manifest_url requires current_version to be set".to_string(),
            ));
        }

        if self.persisted_keys.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "persisted_keys must not contain empty keys".to_string(),
            ));
        }

        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn auto_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.auto_refresh_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Default config file location (`~/.config/freshness/config.yaml`).
    pub fn default_config_path() -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            if let Some(config_dir) = dirs::config_dir() {
                config_dir
                    .join(crate::defaults::APP_DIR_NAME)
                    .join("config.yaml")
            } else {
                PathBuf::from("config.yaml")
            }
        }
        #[cfg(not(target_os = "windows"))]
        {
            if let Some(home_dir) = dirs::home_dir() {
                home_dir
                    .join(".config")
                    .join(crate::defaults::APP_DIR_NAME)
                    .join("config.yaml")
            } else {
                PathBuf::from("config.yaml")
            }
        }
    }
}
